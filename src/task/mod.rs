// Task and result model
//
// Tasks are the routable units of work; results record the outcome of
// a single execution attempt.

pub mod result;
pub mod task;

pub use result::{Artifact, TaskMetrics, TaskResult};
pub use task::{Payload, Priority, Task, TaskStatus};
