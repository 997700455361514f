//! Process-wide shutdown flag.
//!
//! [`ShutdownFlag`] is the only state shared between the interrupt path and
//! the accept loop. It is an explicit handle rather than a global: whoever
//! builds the server creates one, hands a clone to the signal bridge and a
//! clone to the [`AcceptLoop`](crate::server::AcceptLoop), and tests can build
//! as many independent instances as they like.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic "shutdown has been requested" marker.
///
/// Starts `false`, becomes `true` on the first [`request_shutdown`] and never
/// goes back. The write uses release ordering and every read uses acquire
/// ordering, so a reader that observes `true` also observes everything the
/// requester did before setting it.
///
/// [`request_shutdown`]: ShutdownFlag::request_shutdown
///
/// # Example
///
/// ```rust
/// use knock::ShutdownFlag;
///
/// let flag = ShutdownFlag::new();
/// let observer = flag.clone();
///
/// assert!(!observer.is_shutdown_requested());
/// assert!(flag.request_shutdown());
/// assert!(!flag.request_shutdown());
/// assert!(observer.is_shutdown_requested());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    // Cancelled after `requested` is stored, never before.
    notify: CancellationToken,
}

impl ShutdownFlag {
    /// Creates a flag in the "running" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks shutdown as requested.
    ///
    /// Safe to call any number of times from any thread. Returns `true` only
    /// for the call that performed the transition, so callers can run
    /// one-time side effects (such as the unblock probe) exactly once.
    pub fn request_shutdown(&self) -> bool {
        let was_requested = self.inner.requested.swap(true, Ordering::AcqRel);
        self.inner.notify.cancel();
        !was_requested
    }

    /// Non-blocking read of the flag.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn requested(&self) {
        self.inner.notify.cancelled().await;
    }
}
