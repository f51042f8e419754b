use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::collaboration::ResolutionMethod;
use crate::agents::errors::{AgentError, AgentResult};
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

const ENV_PREFIX: &str = "ORCHESTRATOR_";

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on task executions running at the same time
    pub max_concurrent_tasks: usize,
    /// Per-execution timeout, applied on top of the caller's context
    pub task_timeout: Duration,
    /// Route executions through circuit breakers and the retry policy
    pub enable_resilience: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    /// Allow multi-agent collaboration on a task
    pub enable_collaboration: bool,
    /// How conflicts left open by a collaboration are settled
    pub conflict_resolution: ResolutionMethod,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            task_timeout: Duration::from_secs(30 * 60),
            enable_resilience: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            enable_collaboration: true,
            conflict_resolution: ResolutionMethod::Voting,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from `ORCHESTRATOR_*` environment variables
    ///
    /// Unset variables keep their defaults. Recognised variables:
    /// `MAX_CONCURRENT_TASKS`, `TASK_TIMEOUT_SECS`, `ENABLE_RESILIENCE`,
    /// `BREAKER_FAILURE_THRESHOLD`, `BREAKER_SUCCESS_THRESHOLD`,
    /// `BREAKER_TIMEOUT_SECS`, `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`,
    /// `RETRY_MAX_DELAY_MS`, `RETRY_MULTIPLIER`, `RETRY_JITTER`,
    /// `ENABLE_COLLABORATION`, `CONFLICT_RESOLUTION`.
    pub fn from_env() -> AgentResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup };
        let mut config = Self::default();

        if let Some(n) = vars.parse("MAX_CONCURRENT_TASKS")? {
            config.max_concurrent_tasks = n;
        }
        if let Some(secs) = vars.parse("TASK_TIMEOUT_SECS")? {
            config.task_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = vars.flag("ENABLE_RESILIENCE")? {
            config.enable_resilience = enabled;
        }

        if let Some(n) = vars.parse("BREAKER_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = n;
        }
        if let Some(n) = vars.parse("BREAKER_SUCCESS_THRESHOLD")? {
            config.circuit_breaker.success_threshold = n;
        }
        if let Some(secs) = vars.parse("BREAKER_TIMEOUT_SECS")? {
            config.circuit_breaker.timeout = Duration::from_secs(secs);
        }

        if let Some(n) = vars.parse("RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = vars.parse("RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = vars.parse("RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = vars.parse("RETRY_MULTIPLIER")? {
            config.retry.multiplier = multiplier;
        }
        if let Some(jitter) = vars.flag("RETRY_JITTER")? {
            config.retry.jitter = jitter;
        }

        if let Some(enabled) = vars.flag("ENABLE_COLLABORATION")? {
            config.enable_collaboration = enabled;
        }
        if let Some(method) = vars.parse("CONFLICT_RESOLUTION")? {
            config.conflict_resolution = method;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the coordinator cannot run with
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(AgentError::ConfigError(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(AgentError::ConfigError(
                "task_timeout must be greater than zero".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0
        {
            return Err(AgentError::ConfigError(
                "circuit breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AgentError::ConfigError(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(AgentError::ConfigError(
                "retry multiplier must be a finite number >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_resilience(mut self, enabled: bool) -> Self {
        self.enable_resilience = enabled;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_collaboration(mut self, enabled: bool) -> Self {
        self.enable_collaboration = enabled;
        self
    }

    pub fn with_conflict_resolution(mut self, method: ResolutionMethod) -> Self {
        self.conflict_resolution = method;
        self
    }
}

struct EnvVars<F> {
    lookup: F,
}

impl<F> EnvVars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<(String, String)> {
        let key = format!("{ENV_PREFIX}{name}");
        let value = (self.lookup)(&key)?;
        let value = value.trim().to_string();
        if value.is_empty() {
            return None;
        }
        Some((key, value))
    }

    fn parse<T>(&self, name: &str) -> AgentResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some((key, value)) = self.raw(name) else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|e| AgentError::ConfigError(format!("invalid {key}={value}: {e}")))
    }

    fn flag(&self, name: &str) -> AgentResult<Option<bool>> {
        let Some((key, value)) = self.raw(name) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(AgentError::ConfigError(format!(
                "invalid {key}={value}: expected a boolean"
            ))),
        }
    }
}
