// Task coordination
//
// The coordinator owns submitted tasks and their results, picks agents by
// capability and load, and runs executions through the resilience layer.

pub mod config;
pub mod coordinator;
pub mod stats;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use stats::{AgentStats, ExecutionLedger};
