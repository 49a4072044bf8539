// Cooperative cancellation.
//
// Every job command carries a token; the command checks it at each
// suspension boundary and returns promptly once it fires. Cancelling an
// already-cancelled token is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cancellation signal shared between a job's owner and its command body.
///
/// Cloning yields another view of the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether two tokens are views of the same signal.
    pub fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve once the token fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        // Re-check after registering, otherwise a cancel between the load
        // and the registration would be missed.
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
