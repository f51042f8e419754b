use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentStatus, AgentType};
use crate::resilience::CircuitBreakerState;

/// Executions the coordinator has routed to one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLedger {
    /// Attempts that reached the agent
    pub executions: u64,
    /// Attempts that ended in an error, a nil result or an unsuccessful result
    pub failures: u64,
    /// Executions refused because the agent's breaker was open
    pub circuit_rejections: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

/// Aggregated view of an agent for observability
///
/// Combines the agent's own health report, the coordinator's execution
/// ledger and the agent's circuit breaker state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub agent_type: Option<AgentType>,
    pub status: AgentStatus,
    pub healthy: bool,
    pub uptime: Duration,
    pub task_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub active_executions: usize,
    pub circuit_state: CircuitBreakerState,
    pub ledger: ExecutionLedger,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            agent_type: None,
            status: AgentStatus::Offline,
            healthy: false,
            uptime: Duration::ZERO,
            task_count: 0,
            error_count: 0,
            error_rate: 0.0,
            active_executions: 0,
            circuit_state: CircuitBreakerState::Closed,
            ledger: ExecutionLedger::default(),
        }
    }
}

impl AgentStats {
    /// Zero stats for an agent id the coordinator does not know
    pub fn empty(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn collect(
        agent: &dyn Agent,
        circuit_state: CircuitBreakerState,
        ledger: ExecutionLedger,
    ) -> Self {
        let health = agent.health();
        Self {
            agent_id: agent.id().to_string(),
            agent_type: Some(agent.agent_type()),
            status: health.status,
            healthy: health.healthy,
            uptime: health.uptime,
            task_count: health.task_count,
            error_count: health.error_count,
            error_rate: health.error_rate,
            active_executions: health.active_executions,
            circuit_state,
            ledger,
        }
    }
}
