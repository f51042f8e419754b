//! Ghost Pirates Orchestrator Library
//!
//! Agent task coordination and workflow orchestration: tasks are routed to
//! capability-matched agents, executed behind per-agent circuit breakers and
//! retry policies, and sequenced into multi-step workflows.

pub mod agents;
pub mod context;
pub mod coordinator;
pub mod resilience;
pub mod task;
pub mod workflow;

pub use agents::{Agent, AgentError, AgentRegistry, AgentResult};
pub use context::Context;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use task::{Priority, Task, TaskResult, TaskStatus};
pub use workflow::{Workflow, WorkflowExecutor, WorkflowStep};
