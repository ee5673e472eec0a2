//! Cancellation plus deadline, carried by every job.
//!
//! A [`CancelScope`] is derived from the request that created the job: the
//! request's token is the parent, so a client disconnect (or server
//! shutdown) cancels the job, and the deadline is fixed when the job is
//! built regardless of any timeout the HTTP layer applies.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Cancellation token and absolute deadline for one unit of work.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl CancelScope {
    /// Scope with its own token, expiring `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self::child_of(&CancellationToken::new(), timeout)
    }

    /// Scope canceled whenever `parent` is, expiring `timeout` from now.
    pub fn child_of(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: deadline_after(timeout),
            timeout,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The relative timeout the deadline was computed from.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancel this scope (and nothing above it).
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `Err` if the scope is already canceled or expired.
    ///
    /// Cancellation wins over expiry when both hold.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Canceled)
        } else if Instant::now() >= self.deadline {
            Err(Error::TimedOut {
                after: self.timeout,
            })
        } else {
            Ok(())
        }
    }

    /// Resolve once the scope ends, yielding the error describing why.
    pub async fn done(&self) -> Error {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Error::Canceled,
            _ = tokio::time::sleep_until(self.deadline) => Error::TimedOut {
                after: self.timeout,
            },
        }
    }

    /// Run `fut` to completion unless the scope ends first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}
