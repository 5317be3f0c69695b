//! Cooperative cancellation for store operations.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// Per-call cancellation signal and deadline.
///
/// Stores call [`OpContext::check`] before taking their lock. An operation
/// that has already acquired the lock runs to completion; there is no
/// preemption and no internal timeout.
#[derive(Clone, Debug, Default)]
pub struct OpContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that never cancels.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context tied to `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the token has fired or the deadline has passed.
    pub fn check(&self) -> StoreResult<()> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(StoreError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }
}
