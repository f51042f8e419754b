use std::sync::Arc;

use async_trait::async_trait;

use super::collaboration::CollaborationResult;
use super::errors::{AgentError, AgentResult};
use super::types::{AgentConfig, AgentStatus, AgentType, Capability, HealthReport};
use crate::context::Context;
use crate::task::{Task, TaskResult};

/// Capability-declaring executor of tasks
///
/// Implementations own their health bookkeeping (usually by embedding a
/// [`BaseAgent`](super::base::BaseAgent)) and are responsible for their own
/// internal concurrency limits. The coordinator only ever talks to agents
/// through this trait.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn agent_type(&self) -> AgentType;

    fn name(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    /// True if the task's type or required capabilities match this agent and
    /// the agent has spare capacity
    fn can_handle(&self, task: &Task) -> bool;

    /// True if the task matches this agent's capability set, regardless of
    /// its current load
    fn matches(&self, task: &Task) -> bool {
        self.can_handle(task)
    }

    /// Executes one attempt of `task`
    ///
    /// `Ok(None)` means the agent produced no result at all; callers treat
    /// that as a defect rather than a success.
    async fn execute(&self, ctx: &Context, task: &Task) -> AgentResult<Option<TaskResult>>;

    /// Works on `task` together with `peers`
    ///
    /// The default runs the task alone and uses its own result as the
    /// consensus.
    async fn collaborate(
        &self,
        ctx: &Context,
        _peers: &[Arc<dyn Agent>],
        task: &Task,
    ) -> AgentResult<CollaborationResult> {
        let started = std::time::Instant::now();
        let mut collaboration = CollaborationResult::new(self.id());

        let result = self
            .execute(ctx, task)
            .await?
            .ok_or_else(|| AgentError::NilResult {
                agent_id: self.id().to_string(),
            })?;

        collaboration.success = result.success;
        collaboration.record(self.id(), result.clone());
        collaboration.consensus = Some(result);
        collaboration.duration = started.elapsed();
        Ok(collaboration)
    }

    async fn initialize(&self, ctx: &Context, config: &AgentConfig) -> AgentResult<()>;

    async fn shutdown(&self, ctx: &Context) -> AgentResult<()>;

    fn status(&self) -> AgentStatus;

    fn health(&self) -> HealthReport;
}
