use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agents::errors::{AgentError, ErrorKind};

/// Bounded, backoff-governed rules for re-attempting a failed execution
///
/// Attempts are numbered from 1. Cancellation and deadline errors are never
/// retried regardless of configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Randomize each delay by up to ±50%
    pub jitter: bool,
    /// When non-empty, only these kinds are retried
    pub retryable: Vec<ErrorKind>,
    /// Kinds that are never retried
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
            retryable: Vec::new(),
            non_retryable: vec![
                ErrorKind::Validation,
                ErrorKind::Unauthorized,
                ErrorKind::InvalidInput,
                ErrorKind::NilTask,
                ErrorKind::NilResult,
                ErrorKind::CircuitOpen,
                ErrorKind::Cancelled,
                ErrorKind::DeadlineExceeded,
            ],
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn with_non_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.non_retryable = kinds.into_iter().collect();
        self
    }

    /// Whether `err`, raised by attempt number `attempt`, warrants another try
    pub fn should_retry(&self, err: &AgentError, attempt: u32) -> bool {
        if attempt >= self.max_attempts || err.is_cancellation() {
            return false;
        }

        let kind = err.kind();
        if self.non_retryable.contains(&kind) {
            return false;
        }
        self.retryable.is_empty() || self.retryable.contains(&kind)
    }

    /// Delay before the attempt following `attempt`:
    /// `min(max_delay, base_delay * multiplier^(attempt-1))`, optionally jittered
    pub fn get_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max = self.max_delay.as_secs_f64();
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.clamp(0.0, max) } else { max };

        let secs = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            (capped * factor).min(max)
        } else {
            capped
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}
