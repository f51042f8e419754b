use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::CoordinatorConfig;
use super::stats::{AgentStats, ExecutionLedger};
use crate::agents::{
    Agent, AgentError, AgentRegistry, AgentResult, AgentStatus, CollaborationResult,
};
use crate::context::Context;
use crate::resilience::{CircuitBreakerManager, CircuitBreakerState, ResilientExecutor};
use crate::task::{Payload, Task, TaskResult, TaskStatus};

/// Accepts tasks, routes them to capable agents and records their results
///
/// Every map is guarded by its own lock, held only for the map access. Agent
/// code is always called with no coordinator lock held.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<AgentRegistry>,
    tasks: RwLock<HashMap<Uuid, Arc<Mutex<Task>>>>,
    results: RwLock<HashMap<Uuid, TaskResult>>,
    ledgers: RwLock<HashMap<String, ExecutionLedger>>,
    breakers: Arc<CircuitBreakerManager>,
    executor: ResilientExecutor,
    permits: Semaphore,
    accepting: AtomicBool,
    in_flight: Mutex<HashMap<Uuid, Context>>,
    drained: Notify,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> AgentResult<Self> {
        Self::with_registry(config, Arc::new(AgentRegistry::new()))
    }

    /// Builds a coordinator over an existing registry
    pub fn with_registry(
        config: CoordinatorConfig,
        registry: Arc<AgentRegistry>,
    ) -> AgentResult<Self> {
        config.validate()?;

        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker));
        let executor = ResilientExecutor::new(config.retry.clone(), breakers.clone());

        Ok(Self {
            permits: Semaphore::new(config.max_concurrent_tasks),
            config,
            registry,
            tasks: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            ledgers: RwLock::new(HashMap::new()),
            breakers,
            executor,
            accepting: AtomicBool::new(true),
            in_flight: Mutex::new(HashMap::new()),
            drained: Notify::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    // ===== Agents =====

    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> AgentResult<()> {
        let agent_id = agent.id().to_string();
        let agent_type = agent.agent_type();
        self.registry.register(agent)?;
        info!(agent_id = %agent_id, agent_type = %agent_type, "agent registered");
        Ok(())
    }

    /// Removes an agent together with its breaker and ledger
    pub fn unregister_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        let removed = self.registry.unregister(agent_id)?;
        self.breakers.remove(agent_id);
        self.ledgers.write().remove(agent_id);
        info!(agent_id, "agent unregistered");
        Some(removed)
    }

    pub fn list_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.registry.list()
    }

    /// Health, ledger and breaker state for one agent. Unknown agents yield
    /// empty stats.
    pub fn get_agent_stats(&self, agent_id: &str) -> AgentStats {
        match self.registry.get(agent_id) {
            Ok(agent) => self.stats_for(agent.as_ref()),
            Err(_) => AgentStats::empty(agent_id),
        }
    }

    pub fn all_agent_stats(&self) -> HashMap<String, AgentStats> {
        self.registry
            .list()
            .into_iter()
            .map(|agent| (agent.id().to_string(), self.stats_for(agent.as_ref())))
            .collect()
    }

    fn stats_for(&self, agent: &dyn Agent) -> AgentStats {
        let ledger = self
            .ledgers
            .read()
            .get(agent.id())
            .copied()
            .unwrap_or_default();
        AgentStats::collect(agent, self.circuit_breaker_state(agent.id()), ledger)
    }

    fn record(&self, agent_id: &str, update: impl FnOnce(&mut ExecutionLedger)) {
        let mut ledgers = self.ledgers.write();
        update(ledgers.entry(agent_id.to_string()).or_default());
    }

    // ===== Circuit breakers =====

    pub fn circuit_breaker_state(&self, agent_id: &str) -> CircuitBreakerState {
        if !self.config.enable_resilience {
            return CircuitBreakerState::Closed;
        }
        self.breakers.get_state(agent_id)
    }

    pub fn reset_circuit_breaker(&self, agent_id: &str) {
        self.breakers.reset(agent_id);
        info!(agent_id, "circuit breaker reset");
    }

    pub fn circuit_breaker_stats(&self) -> HashMap<String, CircuitBreakerState> {
        if !self.config.enable_resilience {
            return HashMap::new();
        }
        self.breakers.stats()
    }

    // ===== Tasks =====

    /// Stores a pending task and returns its id without executing it
    pub fn submit_task(&self, task: Task) -> AgentResult<Uuid> {
        if !self.is_accepting() {
            return Err(AgentError::ShuttingDown);
        }
        if task.is_nil() {
            return Err(AgentError::NilTask);
        }
        if task.status() != TaskStatus::Pending {
            return Err(AgentError::InvalidStateTransition {
                from: task.status().to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }

        let task_id = task.id();
        let task_type = task.task_type().to_string();
        {
            let mut tasks = self.tasks.write();
            if tasks.contains_key(&task_id) {
                return Err(AgentError::InvalidInput(format!(
                    "task {task_id} already submitted"
                )));
            }
            tasks.insert(task_id, Arc::new(Mutex::new(task)));
        }

        debug!(task_id = %task_id, task_type = %task_type, "task submitted");
        Ok(task_id)
    }

    fn task_handle(&self, task_id: Uuid) -> AgentResult<Arc<Mutex<Task>>> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(AgentError::TaskNotFound(task_id))
    }

    /// Snapshot of a submitted task
    pub fn get_task(&self, task_id: Uuid) -> AgentResult<Task> {
        let handle = self.task_handle(task_id)?;
        let task = handle.lock().clone();
        Ok(task)
    }

    pub fn get_task_status(&self, task_id: Uuid) -> AgentResult<TaskStatus> {
        let handle = self.task_handle(task_id)?;
        let status = handle.lock().status();
        Ok(status)
    }

    /// Snapshots of every submitted task, oldest first
    pub fn list_tasks(&self) -> Vec<Task> {
        let handles: Vec<_> = self.tasks.read().values().cloned().collect();
        let mut tasks: Vec<Task> = handles.iter().map(|h| h.lock().clone()).collect();
        tasks.sort_by_key(|t| t.created_at());
        tasks
    }

    pub fn get_result(&self, task_id: Uuid) -> AgentResult<TaskResult> {
        if let Some(result) = self.results.read().get(&task_id) {
            return Ok(result.clone());
        }
        if self.tasks.read().contains_key(&task_id) {
            return Err(AgentError::ResultNotFound(task_id));
        }
        Err(AgentError::TaskNotFound(task_id))
    }

    /// Picks the agent for `task`
    ///
    /// Candidates must accept the task and be neither busy nor offline. The
    /// lowest error rate wins; ties go to the agent with fewer tasks, then
    /// to the lower id.
    pub fn find_suitable_agent(&self, task: &Task) -> Option<Arc<dyn Agent>> {
        let mut candidates: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|agent| agent.can_handle(task) && agent.status().is_available())
            .map(|agent| {
                let health = agent.health();
                (agent, health)
            })
            .collect();

        candidates.sort_by(|(a, a_health), (b, b_health)| {
            a_health
                .error_rate
                .total_cmp(&b_health.error_rate)
                .then(a_health.task_count.cmp(&b_health.task_count))
                .then_with(|| a.id().cmp(b.id()))
        });

        candidates.into_iter().next().map(|(agent, _)| agent)
    }

    /// Error for a task no agent can take right now
    ///
    /// `AgentsBusy` when an online agent matches the task but is at
    /// capacity, `NoSuitableAgent` when nothing registered matches it.
    fn routing_error(&self, task: &Task) -> AgentError {
        let task_type = task.task_type().to_string();
        let capable = self
            .registry
            .list()
            .iter()
            .any(|agent| agent.status() != AgentStatus::Offline && agent.matches(task));
        if capable {
            AgentError::AgentsBusy { task_type }
        } else {
            AgentError::NoSuitableAgent { task_type }
        }
    }

    /// Cancels a task that has not finished
    ///
    /// Pending and blocked tasks are cancelled in place. A running task has
    /// its execution context cancelled and is settled by the execution that
    /// owns it. Returns false for terminal tasks.
    pub fn cancel_task(&self, task_id: Uuid, reason: &str) -> AgentResult<bool> {
        let handle = self.task_handle(task_id)?;
        {
            let mut task = handle.lock();
            if task.status() != TaskStatus::Running {
                let cancelled = task.cancel(reason);
                if cancelled {
                    debug!(task_id = %task_id, reason, "task cancelled before execution");
                }
                return Ok(cancelled);
            }
        }

        let exec_ctx = self.in_flight.lock().get(&task_id).cloned();
        match exec_ctx {
            Some(exec_ctx) => {
                exec_ctx.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs a submitted task to completion on a suitable agent
    ///
    /// Blocks until the execution finishes, fails, or `ctx` is done. The
    /// task must still be pending. The result is stored whether the
    /// execution succeeded or not.
    pub async fn execute_task(&self, ctx: &Context, task_id: Uuid) -> AgentResult<TaskResult> {
        if !self.is_accepting() {
            return Err(AgentError::ShuttingDown);
        }
        ctx.check()?;

        let handle = self.task_handle(task_id)?;
        let snapshot = handle.lock().clone();
        if !snapshot.can_start() {
            return Err(AgentError::InvalidStateTransition {
                from: snapshot.status().to_string(),
                to: TaskStatus::Running.to_string(),
            });
        }

        let agent = self
            .find_suitable_agent(&snapshot)
            .ok_or_else(|| self.routing_error(&snapshot))?;

        let _permit = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.error()),
            permit = self.permits.acquire() => permit.map_err(|_| AgentError::ShuttingDown)?,
        };

        let task = {
            let mut task = handle.lock();
            if !task.start() {
                return Err(AgentError::InvalidStateTransition {
                    from: task.status().to_string(),
                    to: TaskStatus::Running.to_string(),
                });
            }
            task.assign_to(agent.id());
            task.clone()
        };

        let timeout = task
            .time_remaining()
            .map_or(self.config.task_timeout, |left| left.min(self.config.task_timeout));
        let exec_ctx = ctx.child_with_timeout(timeout);
        let _in_flight = self.track(task_id, &exec_ctx);

        info!(
            task_id = %task_id,
            agent_id = %agent.id(),
            task_type = %task.task_type(),
            "executing task"
        );

        let outcome = if self.config.enable_resilience {
            let attempt_agent = agent.clone();
            let attempt_task = task.clone();
            self.executor
                .execute(&exec_ctx, agent.id(), &task, move |attempt_ctx| {
                    self.attempt(attempt_agent.clone(), attempt_ctx, attempt_task.clone())
                })
                .await
        } else {
            let outcome = tokio::select! {
                biased;
                _ = exec_ctx.done() => Err(exec_ctx.error()),
                outcome = self.attempt(agent.clone(), exec_ctx.clone(), task.clone()) => outcome,
            };
            accept_result(agent.id(), outcome)
        };

        self.finish(&handle, agent.id(), outcome)
    }

    async fn attempt(
        &self,
        agent: Arc<dyn Agent>,
        ctx: Context,
        task: Task,
    ) -> AgentResult<Option<TaskResult>> {
        self.record(agent.id(), |ledger| {
            ledger.executions += 1;
            ledger.last_execution_at = Some(Utc::now());
        });

        let outcome = agent.execute(&ctx, &task).await;

        let failed = match &outcome {
            Ok(Some(result)) => !result.success,
            Ok(None) => true,
            Err(err) => !err.is_cancellation(),
        };
        if failed {
            self.record(agent.id(), |ledger| ledger.failures += 1);
        }
        outcome
    }

    fn finish(
        &self,
        handle: &Mutex<Task>,
        agent_id: &str,
        outcome: AgentResult<TaskResult>,
    ) -> AgentResult<TaskResult> {
        match outcome {
            Ok(mut result) => {
                let elapsed = result.duration();
                result.record_execution_time(elapsed);
                let task_id = {
                    let mut task = handle.lock();
                    task.complete(result.output.clone());
                    task.id()
                };
                self.results.write().insert(task_id, result.clone());

                info!(
                    task_id = %task_id,
                    agent_id,
                    attempt = result.attempt,
                    duration_ms = result.duration().as_millis() as u64,
                    "task completed"
                );
                Ok(result)
            }
            Err(err) => {
                if matches!(err.root(), AgentError::CircuitOpen { .. }) {
                    self.record(agent_id, |ledger| ledger.circuit_rejections += 1);
                }

                let task_id = {
                    let mut task = handle.lock();
                    if err.is_cancellation() {
                        task.cancel(err.to_string());
                    } else {
                        let mut metadata = Payload::new();
                        metadata.insert(
                            "error_kind".to_string(),
                            serde_json::to_value(err.kind()).unwrap_or_default(),
                        );
                        metadata.insert(
                            "agent_id".to_string(),
                            Value::String(agent_id.to_string()),
                        );
                        task.fail(err.to_string(), metadata);
                    }
                    task.id()
                };
                self.results
                    .write()
                    .insert(task_id, TaskResult::failure(task_id, agent_id, &err));

                if err.is_cancellation() {
                    warn!(task_id = %task_id, agent_id, error = %err, "task cancelled");
                } else {
                    error!(task_id = %task_id, agent_id, error = %err, "task failed");
                }
                Err(err)
            }
        }
    }

    // ===== Collaboration =====

    /// Runs `task` as a collaboration led by the most suitable agent
    ///
    /// Every other registered agent is offered to the lead as a peer.
    /// Conflicts the lead leaves open are settled with the configured
    /// resolution method. The task does not enter the task map.
    pub async fn collaborate(&self, ctx: &Context, task: &Task) -> AgentResult<CollaborationResult> {
        if !self.config.enable_collaboration {
            return Err(AgentError::CollaborationDisabled);
        }
        if !self.is_accepting() {
            return Err(AgentError::ShuttingDown);
        }
        ctx.check()?;
        if task.is_nil() {
            return Err(AgentError::NilTask);
        }

        let lead = self
            .find_suitable_agent(task)
            .ok_or_else(|| self.routing_error(task))?;
        let peers: Vec<Arc<dyn Agent>> = self
            .registry
            .list()
            .into_iter()
            .filter(|agent| agent.id() != lead.id())
            .collect();

        let _permit = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.error()),
            permit = self.permits.acquire() => permit.map_err(|_| AgentError::ShuttingDown)?,
        };
        let exec_ctx = ctx.child_with_timeout(self.config.task_timeout);
        let _in_flight = self.track(task.id(), &exec_ctx);

        info!(
            task_id = %task.id(),
            agent_id = %lead.id(),
            peers = peers.len(),
            "collaboration started"
        );
        self.record(lead.id(), |ledger| {
            ledger.executions += 1;
            ledger.last_execution_at = Some(Utc::now());
        });

        let outcome = tokio::select! {
            biased;
            _ = exec_ctx.done() => Err(exec_ctx.error()),
            outcome = lead.collaborate(&exec_ctx, &peers, task) => outcome,
        };

        let mut collaboration = match outcome {
            Ok(collaboration) => collaboration,
            Err(err) => {
                if !err.is_cancellation() {
                    self.record(lead.id(), |ledger| ledger.failures += 1);
                }
                error!(task_id = %task.id(), agent_id = %lead.id(), error = %err, "collaboration failed");
                return Err(err);
            }
        };

        let resolved = collaboration.settle(self.config.conflict_resolution);
        info!(
            task_id = %task.id(),
            agent_id = %lead.id(),
            participants = collaboration.participants.len(),
            resolved,
            unresolved = collaboration.unresolved_conflicts(),
            method = %self.config.conflict_resolution,
            "collaboration finished"
        );
        Ok(collaboration)
    }

    fn track(&self, task_id: Uuid, ctx: &Context) -> InFlight<'_> {
        self.in_flight.lock().insert(task_id, ctx.clone());
        InFlight {
            coordinator: self,
            task_id,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    // ===== Lifecycle =====

    /// Stops accepting work, drains in-flight executions and shuts down
    /// every registered agent
    ///
    /// Executions still running when `ctx` is done are cancelled.
    pub async fn shutdown(&self, ctx: &Context) -> AgentResult<()> {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(in_flight = self.in_flight_count(), "coordinator shutting down");
        }
        self.permits.close();

        if !self.wait_drained(Some(ctx)).await {
            let cancelled: Vec<Context> = self.in_flight.lock().values().cloned().collect();
            warn!(
                count = cancelled.len(),
                "shutdown deadline reached, cancelling in-flight executions"
            );
            for exec_ctx in &cancelled {
                exec_ctx.cancel();
            }
            self.wait_drained(None).await;
        }

        let mut first_error = None;
        for agent in self.registry.list() {
            if let Err(err) = agent.shutdown(ctx).await {
                error!(agent_id = %agent.id(), error = %err, "agent shutdown failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("coordinator shut down");
                Ok(())
            }
        }
    }

    /// Waits until no execution is in flight. Returns false if `ctx` is done
    /// first.
    async fn wait_drained(&self, ctx: Option<&Context>) -> bool {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.lock().is_empty() {
                return true;
            }

            match ctx {
                Some(ctx) => {
                    tokio::select! {
                        biased;
                        _ = ctx.done() => return false,
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Turns a raw agent outcome into the coordinator's result contract
fn accept_result(
    agent_id: &str,
    outcome: AgentResult<Option<TaskResult>>,
) -> AgentResult<TaskResult> {
    match outcome {
        Ok(Some(result)) if result.success => Ok(result),
        Ok(Some(result)) => Err(AgentError::TaskExecutionFailed(
            result
                .error
                .unwrap_or_else(|| "agent reported failure".to_string()),
        )),
        Ok(None) => Err(AgentError::NilResult {
            agent_id: agent_id.to_string(),
        }),
        Err(err) => Err(err),
    }
}

struct InFlight<'a> {
    coordinator: &'a Coordinator,
    task_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.coordinator.in_flight.lock();
        in_flight.remove(&self.task_id);
        if in_flight.is_empty() {
            self.coordinator.drained.notify_waiters();
        }
    }
}
