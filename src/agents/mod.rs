// Agent system modules
//
// This module contains the agent abstraction, the shared bookkeeping
// concrete agents embed, and the registry the coordinator routes through.

pub mod agent;
pub mod base;
pub mod collaboration;
pub mod errors;
pub mod registry;
pub mod types;
pub mod worker;

// Re-export main types
pub use agent::Agent;
pub use base::{BaseAgent, ExecutionGuard};
pub use collaboration::{
    CollaborationMessage, CollaborationResult, Conflict, MessageType, Proposal, Resolution,
    ResolutionMethod,
};
pub use errors::{AgentError, AgentResult, ErrorKind};
pub use registry::AgentRegistry;
pub use types::{
    generate_agent_id, AgentConfig, AgentStatus, AgentType, Capability, HealthReport,
};
pub use worker::{FnHandler, TaskHandler, WorkerAgent};
