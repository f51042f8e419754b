use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the agent system
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("LLM API error: {0}")]
    LlmError(String),

    #[error("Task cannot be nil")]
    NilTask,

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Result not found: {0}")]
    ResultNotFound(Uuid),

    #[error("No suitable agent found for task type '{task_type}'")]
    NoSuitableAgent { task_type: String },

    #[error("Every agent able to handle task type '{task_type}' is busy")]
    AgentsBusy { task_type: String },

    #[error("Circuit breaker open for agent {agent_id}")]
    CircuitOpen { agent_id: String },

    #[error("Agent {agent_id} returned no result")]
    NilResult { agent_id: String },

    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Workflow {workflow_id} is stuck: steps {pending:?} have unsatisfied dependencies")]
    WorkflowDeadlock {
        workflow_id: Uuid,
        pending: Vec<String>,
    },

    #[error("Workflow {workflow_id} has a dependency cycle through step '{step_id}'")]
    WorkflowCycle { workflow_id: Uuid, step_id: String },

    #[error("Step {step_id} failed: {source}")]
    StepFailed {
        step_id: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Collaboration is disabled")]
    CollaborationDisabled,
}

/// Coarse classification of [`AgentError`], used by retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Llm,
    NilTask,
    DuplicateAgent,
    NotFound,
    NoSuitableAgent,
    AgentsBusy,
    CircuitOpen,
    NilResult,
    Execution,
    InvalidInput,
    Validation,
    Unauthorized,
    Cancelled,
    DeadlineExceeded,
    InvalidState,
    Workflow,
    ShuttingDown,
    Config,
}

impl AgentError {
    /// Returns the kind of this error. Wrapping errors report the kind of
    /// the error they wrap.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::LlmError(_) => ErrorKind::Llm,
            AgentError::NilTask => ErrorKind::NilTask,
            AgentError::DuplicateAgent(_) => ErrorKind::DuplicateAgent,
            AgentError::AgentNotFound(_)
            | AgentError::TaskNotFound(_)
            | AgentError::ResultNotFound(_)
            | AgentError::WorkflowNotFound(_) => ErrorKind::NotFound,
            AgentError::NoSuitableAgent { .. } => ErrorKind::NoSuitableAgent,
            AgentError::AgentsBusy { .. } => ErrorKind::AgentsBusy,
            AgentError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            AgentError::NilResult { .. } => ErrorKind::NilResult,
            AgentError::TaskExecutionFailed(_) => ErrorKind::Execution,
            AgentError::InvalidInput(_) => ErrorKind::InvalidInput,
            AgentError::Validation(_) => ErrorKind::Validation,
            AgentError::Unauthorized(_) => ErrorKind::Unauthorized,
            AgentError::RetriesExhausted { source, .. } | AgentError::StepFailed { source, .. } => {
                source.kind()
            }
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AgentError::InvalidStateTransition { .. } => ErrorKind::InvalidState,
            AgentError::WorkflowDeadlock { .. } | AgentError::WorkflowCycle { .. } => {
                ErrorKind::Workflow
            }
            AgentError::ShuttingDown => ErrorKind::ShuttingDown,
            AgentError::ConfigError(_) | AgentError::CollaborationDisabled => ErrorKind::Config,
        }
    }

    /// True for cancellation and deadline errors, which are never retried
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// Strips retry and step wrappers, returning the underlying error
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::RetriesExhausted { source, .. } | AgentError::StepFailed { source, .. } => {
                source.root()
            }
            other => other,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
