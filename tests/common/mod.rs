//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ghostpirates_orchestrator::agents::{
    Agent, AgentConfig, AgentError, AgentResult, AgentStatus, AgentType, BaseAgent, Capability,
    HealthReport, WorkerAgent,
};
use ghostpirates_orchestrator::resilience::RetryPolicy;
use ghostpirates_orchestrator::task::{Payload, Task, TaskResult};
use ghostpirates_orchestrator::{Context, Coordinator, CoordinatorConfig};

/// Coordinator with millisecond retry delays
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig::default().with_retry(
        RetryPolicy::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5)),
    )
}

pub fn coordinator(config: CoordinatorConfig) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(config).expect("valid config"))
}

/// Agent that echoes its input plus a `<type>` marker and counts invocations
pub fn counting_agent(
    id: &str,
    agent_type: AgentType,
    max_concurrent: usize,
    calls: Arc<AtomicUsize>,
) -> Arc<WorkerAgent> {
    Arc::new(WorkerAgent::from_fn(
        AgentConfig::for_type(agent_type)
            .with_id(id)
            .with_max_concurrent(max_concurrent),
        move |_, task| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let mut output = task.input().clone();
                output.insert(agent_type.as_str().to_string(), Value::Bool(true));
                Ok(output)
            }
        },
    ))
}

/// Agent that fails every task whose title is listed and echoes the rest
pub fn scripted_agent(agent_type: AgentType, failing_titles: &[&str]) -> Arc<WorkerAgent> {
    let failing: Vec<String> = failing_titles.iter().map(|t| t.to_string()).collect();
    Arc::new(WorkerAgent::from_fn(
        AgentConfig::for_type(agent_type).with_max_concurrent(4),
        move |_, task| {
            let fails = failing.iter().any(|t| t == task.title());
            async move {
                if fails {
                    return Err(AgentError::Validation(format!(
                        "{} rejected",
                        task.title()
                    )));
                }
                let mut output = task.input().clone();
                output.insert(
                    format!("{}_by", task.title()),
                    Value::String(agent_type.as_str().to_string()),
                );
                Ok(output)
            }
        },
    ))
}

/// Agent that sleeps before echoing, tracking how many runs overlap
pub fn slow_agent(
    agent_type: AgentType,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> Arc<WorkerAgent> {
    Arc::new(WorkerAgent::from_fn(
        AgentConfig::for_type(agent_type).with_max_concurrent(4),
        move |_, task| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(task.input().clone())
            }
        },
    ))
}

/// Agent that fails its first `failures` calls and succeeds afterwards
pub fn recovering_agent(id: &str, agent_type: AgentType, failures: usize) -> Arc<WorkerAgent> {
    let calls = Arc::new(AtomicUsize::new(0));
    Arc::new(WorkerAgent::from_fn(
        AgentConfig::for_type(agent_type).with_id(id),
        move |_, _| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(AgentError::LlmError("provider unavailable".to_string()))
                } else {
                    Ok(Payload::new())
                }
            }
        },
    ))
}

/// Misbehaving agent that finishes without producing a result
pub struct NilResultAgent {
    base: BaseAgent,
}

impl NilResultAgent {
    pub fn new(id: &str) -> Self {
        Self {
            base: BaseAgent::new(AgentConfig::for_type(AgentType::Coding).with_id(id)),
        }
    }
}

#[async_trait]
impl Agent for NilResultAgent {
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

    async fn execute(&self, _ctx: &Context, _task: &Task) -> AgentResult<Option<TaskResult>> {
        let _guard = self.base.begin_execution();
        Ok(None)
    }

    async fn initialize(&self, _ctx: &Context, _config: &AgentConfig) -> AgentResult<()> {
        Ok(())
    }

    async fn shutdown(&self, _ctx: &Context) -> AgentResult<()> {
        self.base.set_status(AgentStatus::Offline);
        Ok(())
    }

    fn status(&self) -> AgentStatus {
        self.base.status()
    }

    fn health(&self) -> HealthReport {
        self.base.health()
    }
}
