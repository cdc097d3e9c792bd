//! Cooperative cancellation.
//!
//! A [`RequestToken`] is created once per logical request and shared by every
//! stage and every retry attempt that works on it. Cancellation is monotonic:
//! once cancelled, a token stays cancelled, and each registered handler runs
//! exactly once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

type Handler = Box<dyn FnOnce() + Send>;

/// `Some(handlers)` while live, `None` once cancelled.
type State = Option<Vec<Handler>>;

/// A shared, monotonic cancellation handle.
///
/// Cloning a token yields another handle to the same cancellation state.
///
/// # Examples
///
/// ```
/// use loadchain::RequestToken;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let token = RequestToken::new();
/// let calls = Arc::new(AtomicUsize::new(0));
///
/// let counter = calls.clone();
/// token.on_cancel(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// token.cancel();
/// token.cancel();
///
/// assert!(token.is_cancelled());
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct RequestToken {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    // Wakes `cancelled()` futures, which register no handler.
    notify: Notify,
}

impl RequestToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Some(Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().is_none()
    }

    /// Cancels the token, running registered handlers in registration order.
    ///
    /// Only the first call has any effect.
    pub fn cancel(&self) {
        let handlers = self.lock().take();

        // Handlers run outside the lock so they may touch the token again.
        if let Some(handlers) = handlers {
            tracing::debug!(handlers = handlers.len(), "Request token cancelled");
            self.inner.notify.notify_waiters();
            for handler in handlers {
                handler();
            }
        }
    }

    /// Registers a handler to run on cancellation.
    ///
    /// If the token is already cancelled the handler runs immediately.
    pub fn on_cancel(&self, handler: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        match state.as_mut() {
            Some(handlers) => handlers.push(Box::new(handler)),
            None => {
                drop(state);
                handler();
            }
        }
    }

    /// Resolves once the token is cancelled.
    ///
    /// Unlike [`on_cancel`](Self::on_cancel), waiting registers nothing on the
    /// token that outlives the returned future, so it may be awaited (and
    /// abandoned) any number of times.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
