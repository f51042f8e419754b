// Workflow orchestration
//
// A workflow is a DAG of steps bound to agent types or capabilities. The
// executor dispatches ready steps concurrently through the coordinator and
// chains successful outputs into dependent steps' inputs.

pub mod executor;
pub mod workflow;

pub use executor::{WorkflowExecutor, WorkflowExecutorConfig};
pub use workflow::{StepStatus, Workflow, WorkflowStatus, WorkflowStep};
