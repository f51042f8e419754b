use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;

use super::types::{AgentConfig, AgentStatus, AgentType, Capability, HealthReport};
use crate::task::Task;

/// Error rate at or above which an agent reports itself unhealthy
const UNHEALTHY_ERROR_RATE: f64 = 0.2;

#[derive(Debug)]
struct Counters {
    status: AgentStatus,
    active: usize,
    task_count: u64,
    error_count: u64,
}

/// Shared bookkeeping for agent implementations
///
/// Holds identity, capabilities, and the counters behind
/// [`HealthReport`]. All counters are mutated under the agent's own lock.
#[derive(Debug)]
pub struct BaseAgent {
    id: String,
    agent_type: AgentType,
    name: String,
    capabilities: Vec<Capability>,
    max_concurrent: usize,
    config: AgentConfig,
    started: Instant,
    counters: Mutex<Counters>,
}

impl BaseAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            agent_type: config.agent_type,
            name: config.name.clone(),
            capabilities: config.capabilities.clone(),
            max_concurrent: config.max_concurrent.max(1),
            config,
            started: Instant::now(),
            counters: Mutex::new(Counters {
                status: AgentStatus::Idle,
                active: 0,
                task_count: 0,
                error_count: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn status(&self) -> AgentStatus {
        self.counters.lock().status
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.counters.lock().status = status;
    }

    pub fn active_executions(&self) -> usize {
        self.counters.lock().active
    }

    pub fn is_at_capacity(&self) -> bool {
        self.counters.lock().active >= self.max_concurrent
    }

    /// Checks whether a task matches this agent's capability set
    ///
    /// Tasks listing required capabilities need all of them. Otherwise the
    /// task type must name one of the agent's capabilities or its type.
    pub fn matches(&self, task: &Task) -> bool {
        if !task.required_capabilities().is_empty() {
            return task
                .required_capabilities()
                .iter()
                .all(|required| self.capabilities.contains(required));
        }

        let task_type = task.task_type();
        task_type == self.agent_type.as_str()
            || self.capabilities.iter().any(|c| c.as_str() == task_type)
    }

    /// Capability match plus spare capacity, for online agents
    pub fn can_handle(&self, task: &Task) -> bool {
        if task.is_nil() || !self.matches(task) {
            return false;
        }
        let counters = self.counters.lock();
        counters.status != AgentStatus::Offline && counters.active < self.max_concurrent
    }

    pub fn increment_task_count(&self) {
        self.counters.lock().task_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.counters.lock().error_count += 1;
    }

    /// Marks one execution as in progress until the returned guard is dropped
    pub fn begin_execution(&self) -> ExecutionGuard<'_> {
        let mut counters = self.counters.lock();
        counters.active += 1;
        counters.task_count += 1;
        if counters.active >= self.max_concurrent && counters.status == AgentStatus::Idle {
            counters.status = AgentStatus::Busy;
        }
        ExecutionGuard { agent: self }
    }

    fn end_execution(&self) {
        let mut counters = self.counters.lock();
        counters.active = counters.active.saturating_sub(1);
        if counters.status == AgentStatus::Busy && counters.active < self.max_concurrent {
            counters.status = AgentStatus::Idle;
        }
    }

    pub fn health(&self) -> HealthReport {
        let counters = self.counters.lock();
        let error_rate = if counters.task_count > 0 {
            counters.error_count as f64 / counters.task_count as f64
        } else {
            0.0
        };
        let healthy = !matches!(counters.status, AgentStatus::Error | AgentStatus::Offline)
            && error_rate < UNHEALTHY_ERROR_RATE;

        HealthReport {
            agent_id: self.id.clone(),
            healthy,
            status: counters.status,
            uptime: self.started.elapsed(),
            task_count: counters.task_count,
            error_count: counters.error_count,
            error_rate,
            active_executions: counters.active,
            timestamp: Utc::now(),
        }
    }
}

/// Keeps an execution counted as active; restores the agent's availability
/// when dropped, including when the execution future is cancelled
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    agent: &'a BaseAgent,
}

impl ExecutionGuard<'_> {
    /// Records the execution as failed in the agent's error counter
    pub fn record_error(&self) {
        self.agent.increment_error_count();
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.agent.end_execution();
    }
}
