use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreakerManager;
use super::retry::RetryPolicy;
use crate::agents::errors::{AgentError, AgentResult};
use crate::context::Context;
use crate::task::{Task, TaskResult};

/// Circuit breaker + retry policy around a single execution call
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    breakers: Arc<CircuitBreakerManager>,
}

impl ResilientExecutor {
    pub fn new(policy: RetryPolicy, breakers: Arc<CircuitBreakerManager>) -> Self {
        Self { policy, breakers }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    /// Executes `f` for `task` against `agent_id`'s breaker
    ///
    /// Each attempt gets a fresh result from `f`; only the last one is
    /// returned. An open breaker fails fast without consuming an attempt.
    /// `Ok(None)` and unsuccessful results are treated as failures. When the
    /// attempts run out, the last error is wrapped in
    /// [`AgentError::RetriesExhausted`]; non-retryable errors are returned
    /// as they are.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &Context,
        agent_id: &str,
        task: &Task,
        mut f: F,
    ) -> AgentResult<TaskResult>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = AgentResult<Option<TaskResult>>>,
    {
        let breaker = self.breakers.get_or_create(agent_id);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            ctx.check()?;
            breaker.acquire()?;

            debug!(task_id = %task.id(), agent_id, attempt, "executing attempt");

            let outcome = tokio::select! {
                biased;
                _ = ctx.done() => Err(ctx.error()),
                outcome = f(ctx.clone()) => outcome,
            };

            let err = match outcome {
                Ok(Some(mut result)) if result.success => {
                    breaker.record_success();
                    result.attempt = attempt;
                    return Ok(result);
                }
                Ok(Some(result)) => AgentError::TaskExecutionFailed(
                    result.error.unwrap_or_else(|| "agent reported failure".to_string()),
                ),
                Ok(None) => AgentError::NilResult {
                    agent_id: agent_id.to_string(),
                },
                Err(err) => err,
            };

            if err.is_cancellation() {
                return Err(err);
            }
            breaker.record_failure();

            if !self.policy.should_retry(&err, attempt) {
                if attempt >= max_attempts && max_attempts > 1 {
                    return Err(AgentError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                return Err(err);
            }

            let delay = self.policy.get_delay(attempt);
            warn!(
                task_id = %task.id(),
                agent_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.error()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
