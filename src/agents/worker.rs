use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::agent::Agent;
use super::base::BaseAgent;
use super::collaboration::{
    CollaborationMessage, CollaborationResult, Conflict, MessageType, Proposal,
};
use super::errors::{AgentError, AgentResult};
use super::types::{AgentConfig, AgentStatus, AgentType, Capability, HealthReport};
use crate::context::Context;
use crate::task::{Payload, Priority, Task, TaskResult};

/// The work a [`WorkerAgent`] performs for each task
///
/// Model-backed agents (coding, review, testing, debugging, planning) plug
/// their provider calls in here.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, task: &Task) -> AgentResult<Payload>;
}

type HandlerFn = dyn Fn(Context, Task) -> BoxFuture<'static, AgentResult<Payload>> + Send + Sync;

/// Adapts an async closure into a [`TaskHandler`]
pub struct FnHandler {
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<Payload>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx, task| Box::pin(f(ctx, task))),
        }
    }
}

#[async_trait]
impl TaskHandler for FnHandler {
    async fn handle(&self, ctx: &Context, task: &Task) -> AgentResult<Payload> {
        (self.f)(ctx.clone(), task.clone()).await
    }
}

/// Worker Agent that executes tasks matching its specialization
pub struct WorkerAgent {
    base: BaseAgent,
    handler: Arc<dyn TaskHandler>,
}

impl WorkerAgent {
    pub fn new(config: AgentConfig, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            base: BaseAgent::new(config),
            handler,
        }
    }

    /// Create a Worker Agent of `agent_type` with its default capabilities
    pub fn of_type(agent_type: AgentType, handler: Arc<dyn TaskHandler>) -> Self {
        Self::new(AgentConfig::for_type(agent_type), handler)
    }

    pub fn coding(handler: Arc<dyn TaskHandler>) -> Self {
        Self::of_type(AgentType::Coding, handler)
    }

    pub fn review(handler: Arc<dyn TaskHandler>) -> Self {
        Self::of_type(AgentType::Review, handler)
    }

    pub fn testing(handler: Arc<dyn TaskHandler>) -> Self {
        Self::of_type(AgentType::Testing, handler)
    }

    pub fn debugging(handler: Arc<dyn TaskHandler>) -> Self {
        Self::of_type(AgentType::Debugging, handler)
    }

    pub fn planning(handler: Arc<dyn TaskHandler>) -> Self {
        Self::of_type(AgentType::Planning, handler)
    }

    /// Build from an async closure
    pub fn from_fn<F, Fut>(config: AgentConfig, f: F) -> Self
    where
        F: Fn(Context, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<Payload>> + Send + 'static,
    {
        Self::new(config, Arc::new(FnHandler::new(f)))
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }
}

#[async_trait]
impl Agent for WorkerAgent {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn agent_type(&self) -> AgentType {
        self.base.agent_type()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> &[Capability] {
        self.base.capabilities()
    }

    fn can_handle(&self, task: &Task) -> bool {
        self.base.can_handle(task)
    }

    fn matches(&self, task: &Task) -> bool {
        !task.is_nil() && self.base.matches(task)
    }

    async fn execute(&self, ctx: &Context, task: &Task) -> AgentResult<Option<TaskResult>> {
        let guard = self.base.begin_execution();
        let mut result = TaskResult::new(task.id(), self.base.id());

        debug!(agent_id = %self.base.id(), task_id = %task.id(), "executing task");

        let outcome = tokio::select! {
            biased;
            _ = ctx.done() => Err(ctx.error()),
            outcome = self.handler.handle(ctx, task) => outcome,
        };

        match outcome {
            Ok(output) => {
                result.set_success(output);
                Ok(Some(result))
            }
            Err(err) => {
                if !err.is_cancellation() {
                    guard.record_error();
                }
                warn!(agent_id = %self.base.id(), task_id = %task.id(), error = %err, "task failed");
                Err(err)
            }
        }
    }

    /// Runs the task, then involves peers
    ///
    /// Peers of the same type work the same task and their outputs become
    /// competing proposals; diverging proposals are recorded as a conflict.
    /// A peer of this type's hand-off type gets a follow-up task built from
    /// this agent's output. Failing peers are skipped.
    async fn collaborate(
        &self,
        ctx: &Context,
        peers: &[Arc<dyn Agent>],
        task: &Task,
    ) -> AgentResult<CollaborationResult> {
        let started = std::time::Instant::now();
        let lead_id = self.base.id();
        let agent_type = self.base.agent_type();
        let mut collaboration = CollaborationResult::new(lead_id);

        let own = self
            .execute(ctx, task)
            .await?
            .ok_or_else(|| AgentError::NilResult {
                agent_id: lead_id.to_string(),
            })?;
        collaboration.record(lead_id, own.clone());
        let mut proposals = vec![Proposal::from_result(&own).with_reasoning("lead result")];

        for peer in peers.iter().filter(|peer| peer.id() != lead_id) {
            ctx.check()?;

            if peer.agent_type() == agent_type {
                collaboration.message(CollaborationMessage::new(
                    lead_id,
                    peer.id(),
                    MessageType::Question,
                    format!("Second opinion requested on '{}'", task.title()),
                ));
                match peer.execute(ctx, task).await {
                    Ok(Some(result)) if result.success => {
                        proposals.push(Proposal::from_result(&result));
                        collaboration.message(CollaborationMessage::new(
                            peer.id(),
                            lead_id,
                            MessageType::Proposal,
                            "Independent result attached",
                        ));
                        collaboration.record(peer.id(), result);
                    }
                    _ => debug!(agent_id = %lead_id, peer_id = %peer.id(), "peer skipped"),
                }
            } else if agent_type.hand_off() == Some(peer.agent_type()) {
                let priority = if agent_type == AgentType::Review {
                    Priority::High
                } else {
                    Priority::Normal
                };
                let follow_up = Task::new(peer.agent_type().as_str(), priority)
                    .with_title(format!("Follow up on '{}'", task.title()))
                    .with_description(format!("{} output handed off by {lead_id}", agent_type.as_str()))
                    .with_input(own.output.clone())
                    .with_created_by(lead_id);

                collaboration.message(CollaborationMessage::new(
                    lead_id,
                    peer.id(),
                    MessageType::Request,
                    format!("Please pick up the {} output", agent_type.as_str()),
                ));
                match peer.execute(ctx, &follow_up).await {
                    Ok(Some(result)) if result.success => {
                        collaboration.message(CollaborationMessage::new(
                            peer.id(),
                            lead_id,
                            MessageType::Response,
                            "Follow-up completed",
                        ));
                        collaboration.record(peer.id(), result);
                    }
                    _ => debug!(agent_id = %lead_id, peer_id = %peer.id(), "follow-up skipped"),
                }
            }
        }

        let diverged = proposals
            .iter()
            .skip(1)
            .any(|p| p.solution != proposals[0].solution);
        if diverged {
            collaboration.conflicts.push(Conflict::new(
                format!("Diverging results for '{}'", task.title()),
                proposals,
            ));
        }

        collaboration.success = own.success;
        collaboration.consensus = Some(own);
        collaboration.duration = started.elapsed();

        info!(
            agent_id = %lead_id,
            task_id = %task.id(),
            participants = collaboration.participants.len(),
            conflicts = collaboration.conflicts.len(),
            "collaboration finished"
        );
        Ok(collaboration)
    }

    async fn initialize(&self, _ctx: &Context, config: &AgentConfig) -> AgentResult<()> {
        self.base.set_status(AgentStatus::Idle);
        info!(agent_id = %self.base.id(), model = %config.model, "agent initialized");
        Ok(())
    }

    async fn shutdown(&self, _ctx: &Context) -> AgentResult<()> {
        self.base.set_status(AgentStatus::Offline);
        info!(agent_id = %self.base.id(), "agent shut down");
        Ok(())
    }

    fn status(&self) -> AgentStatus {
        self.base.status()
    }

    fn health(&self) -> HealthReport {
        self.base.health()
    }
}
