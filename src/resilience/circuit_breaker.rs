use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::agents::errors::{AgentError, AgentResult};

/// Circuit breaker state
///
/// # State Transitions
/// ```text
/// Closed --failures >= threshold--> Open --timeout elapsed--> HalfOpen
///   ^                                 ^                          |
///   |                                 \-------any failure--------|
///   \-------------successes >= success_threshold----------------/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker
    pub success_threshold: u32,
    /// How long the breaker stays open before admitting a trial call
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-agent failure isolation
///
/// The open-to-half-open transition is evaluated lazily in
/// [`acquire`](Self::acquire); there is no background timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    agent_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(agent_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                timeout: config.timeout,
            },
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Asks permission to make a call
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and
    /// admits the call; otherwise an open breaker fails fast with
    /// [`AgentError::CircuitOpen`].
    pub fn acquire(&self) -> AgentResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::Open {
            return Ok(());
        }

        let elapsed = inner
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.timeout)
            .unwrap_or(true);
        if !elapsed {
            return Err(AgentError::CircuitOpen {
                agent_id: self.agent_id.clone(),
            });
        }

        inner.state = CircuitBreakerState::HalfOpen;
        inner.consecutive_successes = 0;
        info!(agent_id = %self.agent_id, "circuit breaker half-open");
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitBreakerState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                inner.state = CircuitBreakerState::Closed;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
                info!(agent_id = %self.agent_id, "circuit breaker closed");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => {
                inner.consecutive_failures >= self.config.failure_threshold
            }
            CircuitBreakerState::Open => false,
        };
        if trip {
            inner.state = CircuitBreakerState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                agent_id = %self.agent_id,
                failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }

    /// Runs `f` if the breaker admits the call, recording its outcome
    pub async fn call<T, F, Fut>(&self, f: F) -> AgentResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AgentResult<T>>,
    {
        self.acquire()?;
        let outcome = f().await;
        match &outcome {
            Ok(_) => self.record_success(),
            Err(err) if err.is_cancellation() => {}
            Err(_) => self.record_failure(),
        }
        outcome
    }

    /// Current state without triggering the lazy half-open transition
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }
}

/// Owns one breaker per agent id, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn get_or_create(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(agent_id) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(agent_id, self.config))),
        )
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(agent_id).cloned()
    }

    /// State of the agent's breaker; agents without one are closed
    pub fn get_state(&self, agent_id: &str) -> CircuitBreakerState {
        self.get(agent_id)
            .map(|breaker| breaker.state())
            .unwrap_or_default()
    }

    pub fn reset(&self, agent_id: &str) {
        if let Some(breaker) = self.get(agent_id) {
            breaker.reset();
        }
    }

    pub fn remove(&self, agent_id: &str) {
        self.breakers.write().remove(agent_id);
    }

    pub fn stats(&self) -> HashMap<String, CircuitBreakerState> {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        breakers
            .into_iter()
            .map(|breaker| (breaker.agent_id().to_string(), breaker.state()))
            .collect()
    }
}
