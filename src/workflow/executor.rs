use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::workflow::{Workflow, WorkflowStatus, WorkflowStep};
use crate::agents::errors::{AgentError, AgentResult};
use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::task::{Payload, Priority, Task, TaskResult, TaskStatus};

/// Workflow executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutorConfig {
    /// Extra attempts for a step whose agent's circuit breaker is open
    pub circuit_open_retries: u32,
    /// Wait between those attempts
    pub circuit_open_backoff: Duration,
    /// Wait before re-dispatching a step whose capable agents are all busy
    pub busy_backoff: Duration,
}

impl Default for WorkflowExecutorConfig {
    fn default() -> Self {
        Self {
            circuit_open_retries: 0,
            circuit_open_backoff: Duration::from_secs(1),
            busy_backoff: Duration::from_millis(100),
        }
    }
}

/// Outcome of one dispatched step
struct StepRun {
    step_id: String,
    optional: bool,
    result: TaskResult,
    error: Option<AgentError>,
}

/// Drives workflows through the coordinator's execution path
///
/// Every workflow ever executed stays registered for inspection through
/// [`get_workflow`](Self::get_workflow) and
/// [`list_workflows`](Self::list_workflows).
pub struct WorkflowExecutor {
    coordinator: Arc<Coordinator>,
    config: WorkflowExecutorConfig,
    workflows: RwLock<HashMap<Uuid, Arc<Mutex<Workflow>>>>,
}

impl WorkflowExecutor {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self::with_config(coordinator, WorkflowExecutorConfig::default())
    }

    pub fn with_config(coordinator: Arc<Coordinator>, config: WorkflowExecutorConfig) -> Self {
        Self {
            coordinator,
            config,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Snapshot of a registered workflow; may lag behind a running execution
    pub fn get_workflow(&self, workflow_id: Uuid) -> AgentResult<Workflow> {
        let handle = self
            .workflows
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or(AgentError::WorkflowNotFound(workflow_id))?;
        let workflow = handle.lock().clone();
        Ok(workflow)
    }

    /// Snapshots of every registered workflow, oldest first
    pub fn list_workflows(&self) -> Vec<Workflow> {
        let handles: Vec<_> = self.workflows.read().values().cloned().collect();
        let mut workflows: Vec<Workflow> = handles.iter().map(|h| h.lock().clone()).collect();
        workflows.sort_by_key(|w| w.created_at());
        workflows
    }

    /// Runs `workflow` until every step is terminal or a required step fails
    ///
    /// Ready steps are dispatched concurrently. After a required step fails,
    /// or `ctx` is done, no new steps are dispatched but in-flight steps are
    /// awaited before returning. Returns the final snapshot on success; on
    /// failure the workflow stays queryable with its partial results.
    pub async fn execute_workflow(
        &self,
        ctx: &Context,
        workflow: Workflow,
    ) -> AgentResult<Workflow> {
        let workflow_id = workflow.id();
        if workflow.status() != WorkflowStatus::Pending {
            return Err(AgentError::InvalidStateTransition {
                from: workflow.status().to_string(),
                to: WorkflowStatus::Running.to_string(),
            });
        }

        let handle = {
            let mut workflows = self.workflows.write();
            if let Some(existing) = workflows.get(&workflow_id) {
                return Err(AgentError::InvalidStateTransition {
                    from: existing.lock().status().to_string(),
                    to: WorkflowStatus::Running.to_string(),
                });
            }
            let handle = Arc::new(Mutex::new(workflow));
            workflows.insert(workflow_id, handle.clone());
            handle
        };

        let step_count = {
            let mut workflow = handle.lock();
            workflow.start();
            if let Err(err) = workflow.validate() {
                workflow.fail(err.to_string());
                error!(workflow_id = %workflow_id, error = %err, "workflow rejected");
                return Err(err);
            }
            workflow.steps().len()
        };

        info!(workflow_id = %workflow_id, steps = step_count, "workflow started");

        let failure = self.run(ctx, workflow_id, &handle).await;

        let mut workflow = handle.lock();
        match failure {
            None => {
                workflow.complete();
                info!(
                    workflow_id = %workflow_id,
                    completed = workflow.results().values().filter(|r| r.success).count(),
                    "workflow completed"
                );
                Ok(workflow.clone())
            }
            Some(err) => {
                workflow.fail(err.to_string());
                error!(workflow_id = %workflow_id, error = %err, "workflow failed");
                Err(err)
            }
        }
    }

    /// Dispatch loop; returns the error that ends the workflow, if any
    async fn run(
        &self,
        ctx: &Context,
        workflow_id: Uuid,
        handle: &Arc<Mutex<Workflow>>,
    ) -> Option<AgentError> {
        let mut in_flight: JoinSet<StepRun> = JoinSet::new();
        let mut failure: Option<AgentError> = None;

        loop {
            if failure.is_none() && ctx.is_done() {
                failure = Some(ctx.error());
            }

            if failure.is_none() {
                for (step, input) in self.take_ready_steps(handle) {
                    debug!(workflow_id = %workflow_id, step_id = %step.id, "dispatching step");
                    in_flight.spawn(run_step(
                        self.coordinator.clone(),
                        self.config.clone(),
                        ctx.clone(),
                        step,
                        input,
                    ));
                }
            }

            if in_flight.is_empty() {
                if failure.is_some() {
                    break;
                }
                let workflow = handle.lock();
                if workflow.all_steps_terminal() {
                    break;
                }
                let pending = workflow.pending_steps();
                warn!(workflow_id = %workflow_id, pending = ?pending, "workflow deadlocked");
                failure = Some(AgentError::WorkflowDeadlock {
                    workflow_id,
                    pending,
                });
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = ctx.done(), if failure.is_none() => {
                    failure = Some(ctx.error());
                    continue;
                }
                joined = in_flight.join_next() => joined,
            };

            match joined {
                Some(Ok(run)) => {
                    if let Some(err) = self.record(workflow_id, handle, run) {
                        failure.get_or_insert(err);
                    }
                }
                Some(Err(join_err)) => {
                    error!(workflow_id = %workflow_id, error = %join_err, "step worker panicked");
                    failure.get_or_insert(AgentError::TaskExecutionFailed(format!(
                        "step worker panicked: {join_err}"
                    )));
                }
                None => {}
            }
        }

        failure
    }

    /// Claims every ready step and computes its merged input
    fn take_ready_steps(&self, handle: &Mutex<Workflow>) -> Vec<(WorkflowStep, Payload)> {
        let mut workflow = handle.lock();
        let mut claimed = Vec::new();
        for step in workflow.get_ready_steps() {
            if workflow.mark_dispatched(&step.id) {
                let input = workflow.merged_input(&step);
                claimed.push((step, input));
            }
        }
        claimed
    }

    /// Stores a step outcome; returns the error if a required step failed
    fn record(
        &self,
        workflow_id: Uuid,
        handle: &Mutex<Workflow>,
        run: StepRun,
    ) -> Option<AgentError> {
        handle.lock().set_step_result(&run.step_id, run.result);

        let err = run.error?;
        if run.optional {
            warn!(
                workflow_id = %workflow_id,
                step_id = %run.step_id,
                error = %err,
                "optional step failed, continuing"
            );
            return None;
        }

        error!(workflow_id = %workflow_id, step_id = %run.step_id, error = %err, "required step failed");
        Some(AgentError::StepFailed {
            step_id: run.step_id,
            source: Box::new(err),
        })
    }
}

/// Executes one step as a coordinator task
///
/// While every capable agent is busy the same task is re-dispatched after
/// `busy_backoff` until `ctx` is done. A circuit-open rejection is retried
/// with a fresh task up to the configured number of times. A task that
/// never left Pending is cancelled when the step fails.
async fn run_step(
    coordinator: Arc<Coordinator>,
    config: WorkflowExecutorConfig,
    ctx: Context,
    step: WorkflowStep,
    input: Payload,
) -> StepRun {
    let mut retries_left = config.circuit_open_retries;

    let (task_id, outcome) = loop {
        let task = Task::new(step.task_type(), Priority::Normal)
            .with_title(step.name.clone())
            .with_description(format!("Workflow step: {}", step.name))
            .with_input(input.clone())
            .with_required_capabilities(step.required_capabilities.clone());
        let task_id = task.id();

        if let Err(err) = coordinator.submit_task(task) {
            break (task_id, Err(err));
        }

        // The task stays pending while every capable agent is busy
        let outcome = loop {
            match coordinator.execute_task(&ctx, task_id).await {
                Err(AgentError::AgentsBusy { ref task_type }) => {
                    debug!(step_id = %step.id, task_type = %task_type, "agents busy, waiting");
                    tokio::select! {
                        biased;
                        _ = ctx.done() => break Err(ctx.error()),
                        _ = tokio::time::sleep(config.busy_backoff) => {}
                    }
                }
                outcome => break outcome,
            }
        };

        match outcome {
            Err(AgentError::CircuitOpen { ref agent_id }) if retries_left > 0 => {
                retries_left -= 1;
                debug!(
                    step_id = %step.id,
                    agent_id = %agent_id,
                    retries_left,
                    "circuit open, retrying step"
                );
                tokio::select! {
                    biased;
                    _ = ctx.done() => break (task_id, Err(ctx.error())),
                    _ = tokio::time::sleep(config.circuit_open_backoff) => {}
                }
            }
            outcome => break (task_id, outcome),
        }
    };

    match outcome {
        Ok(result) => StepRun {
            step_id: step.id,
            optional: step.optional,
            result,
            error: None,
        },
        Err(err) => {
            release_pending(&coordinator, task_id, &err);
            let result = coordinator
                .get_result(task_id)
                .unwrap_or_else(|_| TaskResult::failure(task_id, "none", &err));
            StepRun {
                step_id: step.id,
                optional: step.optional,
                result,
                error: Some(err),
            }
        }
    }
}

/// Cancels a step's task that never left Pending
fn release_pending(coordinator: &Coordinator, task_id: Uuid, err: &AgentError) {
    if !matches!(coordinator.get_task_status(task_id), Ok(TaskStatus::Pending)) {
        return;
    }
    match coordinator.cancel_task(task_id, &err.to_string()) {
        Ok(_) => debug!(task_id = %task_id, error = %err, "undispatched step task cancelled"),
        Err(cancel_err) => warn!(task_id = %task_id, error = %cancel_err, "failed to cancel step task"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentConfig, AgentType, WorkerAgent};
    use crate::coordinator::CoordinatorConfig;
    use crate::resilience::RetryPolicy;
    use serde_json::Value;

    fn executor() -> WorkflowExecutor {
        let coordinator = Coordinator::new(
            CoordinatorConfig::default().with_retry(RetryPolicy::no_retry()),
        )
        .unwrap();
        for agent_type in AgentType::ALL {
            coordinator
                .register_agent(Arc::new(WorkerAgent::from_fn(
                    AgentConfig::for_type(agent_type).with_max_concurrent(4),
                    move |_, task| async move {
                        let mut output = task.input().clone();
                        output.insert(
                            agent_type.as_str().to_string(),
                            Value::Bool(true),
                        );
                        Ok(output)
                    },
                )))
                .unwrap();
        }
        WorkflowExecutor::new(Arc::new(coordinator))
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let executor = executor();

        let workflow = executor
            .execute_workflow(&Context::new(), Workflow::new("empty", ""))
            .await
            .unwrap();

        assert_eq!(workflow.status(), WorkflowStatus::Completed);
        assert!(workflow.results().is_empty());
        assert!(executor.coordinator().list_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_linear_chain_passes_outputs_forward() {
        let executor = executor();
        let workflow = Workflow::new("chain", "")
            .with_step(WorkflowStep::new("plan", "plan").with_agent_type(AgentType::Planning))
            .with_step(
                WorkflowStep::new("code", "code")
                    .with_agent_type(AgentType::Coding)
                    .depends_on("plan"),
            );

        let workflow = executor
            .execute_workflow(&Context::new(), workflow)
            .await
            .unwrap();

        let code = workflow.get_step_result("code").unwrap();
        assert!(code.success);
        assert_eq!(code.output["planning"], true);
        assert_eq!(code.output["coding"], true);
        assert_eq!(executor.coordinator().list_tasks().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_dispatch() {
        let executor = executor();
        let workflow = Workflow::new("cyclic", "")
            .with_step(WorkflowStep::new("a", "a").depends_on("b"))
            .with_step(WorkflowStep::new("b", "b").depends_on("a"));
        let workflow_id = workflow.id();

        let err = executor
            .execute_workflow(&Context::new(), workflow)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::WorkflowCycle { .. }));
        let stored = executor.get_workflow(workflow_id).unwrap();
        assert_eq!(stored.status(), WorkflowStatus::Failed);
        assert!(executor.coordinator().list_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dependency_deadlocks() {
        let executor = executor();
        let workflow = Workflow::new("broken", "")
            .with_step(WorkflowStep::new("a", "a").with_agent_type(AgentType::Coding))
            .with_step(
                WorkflowStep::new("b", "b")
                    .with_agent_type(AgentType::Testing)
                    .depends_on("ghost"),
            );

        let err = executor
            .execute_workflow(&Context::new(), workflow)
            .await
            .unwrap_err();

        match err {
            AgentError::WorkflowDeadlock { pending, .. } => assert_eq!(pending, vec!["b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_workflow_is_single_use() {
        let executor = executor();
        let workflow = Workflow::new("once", "")
            .with_step(WorkflowStep::new("a", "a").with_agent_type(AgentType::Coding));

        let finished = executor
            .execute_workflow(&Context::new(), workflow.clone())
            .await
            .unwrap();

        assert!(matches!(
            executor.execute_workflow(&Context::new(), workflow).await,
            Err(AgentError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            executor.execute_workflow(&Context::new(), finished).await,
            Err(AgentError::InvalidStateTransition { .. })
        ));
        assert_eq!(executor.list_workflows().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_agent_for_required_step() {
        let executor = executor();
        let workflow = Workflow::new("wf", "")
            .with_step(WorkflowStep::new("x", "x").with_capability("quantum_compilation"));

        let err = executor
            .execute_workflow(&Context::new(), workflow)
            .await
            .unwrap_err();

        assert!(matches!(
            err.root(),
            AgentError::NoSuitableAgent { task_type } if task_type == "quantum_compilation"
        ));
        let tasks = executor.coordinator().list_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status(), TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_wait_stops_on_cancellation() {
        let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default()).unwrap());
        coordinator
            .register_agent(Arc::new(WorkerAgent::from_fn(
                AgentConfig::for_type(AgentType::Coding),
                |_, _| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Payload::new())
                },
            )))
            .unwrap();
        let executor = WorkflowExecutor::new(coordinator.clone());
        let workflow = Workflow::new("stuck", "")
            .with_step(WorkflowStep::new("a", "a").with_agent_type(AgentType::Coding))
            .with_step(WorkflowStep::new("b", "b").with_agent_type(AgentType::Coding));
        let ctx = Context::new();

        let (outcome, _) = tokio::join!(executor.execute_workflow(&ctx, workflow), async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            ctx.cancel();
        });

        assert!(outcome.unwrap_err().is_cancellation());
        let tasks = coordinator.list_tasks();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status() == TaskStatus::Cancelled));
    }

    #[test]
    fn test_unknown_workflow() {
        let executor = executor();
        assert!(matches!(
            executor.get_workflow(Uuid::new_v4()),
            Err(AgentError::WorkflowNotFound(_))
        ));
    }
}
