//! Cancellation token for in-flight dials
//!
//! A dial may block in bind/connect for a long time; the token lets the
//! caller abort it from another task. Cancellation is cooperative: the dial
//! paths race every socket wait against [`CancelToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared cancellation flag
///
/// Cloning yields another handle to the same flag. The default token is
/// never cancelled unless someone calls [`cancel`](CancelToken::cancel).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been triggered
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            // Re-check after registering: a cancel between the load and
            // enable() would otherwise be lost.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
