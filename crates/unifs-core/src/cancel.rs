//! Cancellation and deadlines for long-running operations.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{FsError, FsResult};

/// Cancellation signal plus optional deadline, threaded through listing,
/// hashing, recursive removal and backend dialing.
///
/// Cloning is cheap and clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one owned by a request handler.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Same signal, with a deadline (the earlier one wins if already set).
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A context cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
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

    pub fn is_canceled(&self) -> bool {
        self.check().is_err()
    }

    /// Fail with [`FsError::Canceled`] if cancelled or past the deadline.
    pub fn check(&self) -> FsResult<()> {
        if self.token.is_cancelled() {
            return Err(FsError::Canceled("canceled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FsError::Canceled("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}
