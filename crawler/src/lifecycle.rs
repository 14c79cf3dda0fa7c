//! Shared cancellation handle and deadline helpers.
//!
//! Every blocking call in the crawler is composed with both a per-call deadline
//! and the crawler-wide cancellation signal through [`Lifecycle::bounded`],
//! whichever fires first.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a bounded operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The lifecycle was cancelled.
    Cancelled,
    /// The per-call deadline elapsed first.
    TimedOut,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "Operation cancelled"),
            Interrupted::TimedOut => write!(f, "Deadline elapsed"),
        }
    }
}

impl Error for Interrupted {}

/// Cancellable context shared by the discovery task and every dialer.
///
/// Clones observe the same cancellation. Cancellation is the only termination
/// signal and cannot be undone.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
}

impl Lifecycle {
    /// Create a fresh, uncancelled lifecycle.
    pub fn new() -> Self {
        Lifecycle {
            token: CancellationToken::new(),
        }
    }

    /// Signal cancellation to every holder of this lifecycle and its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the lifecycle is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A lifecycle cancelled along with this one, but which can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Lifecycle {
        Lifecycle {
            token: self.token.child_token(),
        }
    }

    /// Run `operation` until it completes, `timeout` elapses, or the lifecycle is
    /// cancelled.
    ///
    /// Cancellation wins ties, so nothing is started once cancellation has been
    /// observed.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time the operation may take.
    /// * `operation` - The future to drive.
    ///
    /// # Returns
    ///
    /// * `Ok(output)` - The operation finished in time.
    /// * `Err(Interrupted)` - Cancelled or timed out; the operation was dropped.
    pub async fn bounded<F: Future>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> Result<F::Output, Interrupted> {
        self.bounded_until(Instant::now() + timeout, operation).await
    }

    /// Like [`Lifecycle::bounded`], with an absolute deadline shared across
    /// several calls.
    pub async fn bounded_until<F: Future>(
        &self,
        deadline: Instant,
        operation: F,
    ) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            result = tokio::time::timeout_at(deadline, operation) => {
                result.map_err(|_| Interrupted::TimedOut)
            }
        }
    }

    /// Run `operation` until it completes or the lifecycle is cancelled.
    pub async fn guard<F: Future>(&self, operation: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            output = operation => Ok(output),
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

impl From<CancellationToken> for Lifecycle {
    fn from(token: CancellationToken) -> Self {
        Lifecycle { token }
    }
}
