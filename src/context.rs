//! Cancellation and deadline propagation
//!
//! A [`Context`] is handed to every suspending operation in the crate. It pairs
//! a [`CancellationToken`] with an optional deadline; either one firing marks
//! the context as done.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agents::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a context with no deadline that is never cancelled on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child_with_timeout(timeout)
    }

    /// Creates a root context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derives a context that is cancelled whenever this one is, keeping the
    /// same deadline. Cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child whose deadline is the earlier of the parent's deadline
    /// and `now + timeout`
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True once the context was cancelled or its deadline passed
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline_passed()
    }

    /// Resolves as soon as the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error describing why the context is done. Explicit cancellation
    /// takes precedence over an expired deadline.
    pub fn error(&self) -> AgentError {
        if !self.is_cancelled() && self.deadline_passed() {
            AgentError::DeadlineExceeded
        } else {
            AgentError::Cancelled
        }
    }

    pub fn check(&self) -> AgentResult<()> {
        if self.is_done() {
            Err(self.error())
        } else {
            Ok(())
        }
    }
}
