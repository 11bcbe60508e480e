//! Cooperative cancellation for the service worker

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

/// Tells the service functionality that it has been asked to stop. The functionality is
/// expected to check it at its pause points and return promptly once cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Construct a token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cancellation, waking anything sleeping on the token
    pub fn cancel(&self) {
        *self.flag() = true;
        self.inner.signal.notify_all();
        #[cfg(feature = "async")]
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// Pause for the given duration. Returns false, possibly early, if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }

    #[cfg(feature = "async")]
    /// Completes once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
