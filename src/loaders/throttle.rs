use crate::chain::{Loader, Next};
use crate::error::{ErrorCode, HttpError};
use crate::options::{ThrottleBehavior, ThrottleOption};
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

struct State {
    maximum: usize,
    ongoing: usize,
    pending: VecDeque<oneshot::Sender<()>>,
}

impl State {
    /// Hands free capacity to waiters, oldest first. Waiters that already
    /// gave up are skipped without consuming capacity.
    fn signal(&mut self) {
        while self.ongoing < self.maximum {
            let Some(waiter) = self.pending.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                self.ongoing += 1;
            }
        }
    }
}

/// Limits how many requests may be forwarded at the same time.
///
/// Requests beyond the limit wait, in arrival order, until a running request
/// finishes. The limit can be changed at any time; a limit of `0` pauses the
/// loader until it is raised again. Requests whose
/// [`ThrottleOption`](crate::options::ThrottleOption) is
/// [`Unthrottled`](ThrottleBehavior::Unthrottled) bypass the limit entirely.
///
/// # Examples
///
/// ```
/// use loadchain::loaders::ThrottledLoader;
///
/// let throttle = ThrottledLoader::new(4);
/// throttle.set_maximum(0); // pause
/// assert_eq!(throttle.maximum(), 0);
/// ```
pub struct ThrottledLoader {
    state: Mutex<State>,
}

/// One unit of capacity, given back on drop.
struct Permit<'a>(&'a ThrottledLoader);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A queued request. Capacity granted to it but never claimed, because it was
/// cancelled or dropped first, is handed on when it goes away.
struct Waiter<'a> {
    loader: &'a ThrottledLoader,
    granted: oneshot::Receiver<()>,
    claimed: bool,
}

impl<'a> Waiter<'a> {
    async fn wait(mut self, token: &RequestToken) -> Option<Permit<'a>> {
        tokio::select! {
            biased;
            result = &mut self.granted => {
                result.ok()?;
                self.claimed = true;
                Some(Permit(self.loader))
            }
            _ = token.cancelled() => None,
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.claimed {
            return;
        }
        self.granted.close();
        if self.granted.try_recv().is_ok() {
            self.loader.release();
        }
    }
}

impl ThrottledLoader {
    pub fn new(maximum: usize) -> Self {
        Self {
            state: Mutex::new(State {
                maximum,
                ongoing: 0,
                pending: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn maximum(&self) -> usize {
        self.lock().maximum
    }

    /// Number of requests currently forwarded.
    pub fn ongoing(&self) -> usize {
        self.lock().ongoing
    }

    /// Number of requests waiting for capacity.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Changes the limit, waking waiters if it was raised.
    pub fn set_maximum(&self, maximum: usize) {
        let mut state = self.lock();
        tracing::debug!(from = state.maximum, to = maximum, "Changing throttle limit");
        state.maximum = maximum;
        state.signal();
    }

    fn release(&self) {
        let mut state = self.lock();
        state.ongoing = state.ongoing.saturating_sub(1);
        state.signal();
    }

    /// Waits for capacity. Returns `None` if the token is cancelled first.
    async fn acquire(&self, request: &HttpRequest, token: &RequestToken) -> Option<Permit<'_>> {
        let granted = {
            let mut state = self.lock();
            if state.pending.is_empty() && state.ongoing < state.maximum {
                state.ongoing += 1;
                return Some(Permit(self));
            }
            if state.maximum == 0 {
                tracing::warn!(request_id = %request.id(), "Received request while throttling is paused (maximum = 0)");
            }
            let (tx, rx) = oneshot::channel();
            state.pending.push_back(tx);
            rx
        };

        Waiter {
            loader: self,
            granted,
            claimed: false,
        }
        .wait(token)
        .await
    }

    async fn load_throttled(&self, request: HttpRequest, token: RequestToken, next: Next) -> HttpResult {
        if request.option::<ThrottleOption>() == ThrottleBehavior::Unthrottled {
            return next.load(request, token).await;
        }

        let Some(_permit) = self.acquire(&request, &token).await else {
            return Err(HttpError::new(ErrorCode::Cancelled, request)
                .with_message("Cancelled while waiting for throttle capacity"));
        };
        next.load(request, token).await
    }
}

impl Default for ThrottledLoader {
    /// No effective limit.
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl Loader for ThrottledLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        Box::pin(self.load_throttled(request, token, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LoaderChain, LoaderHandle};
    use crate::HttpResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Tracks the highest number of requests it saw at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    struct Measured(Arc<Gauge>);

    impl Loader for Measured {
        fn load(&self, request: HttpRequest, _token: RequestToken, _next: Next) -> BoxFuture<'_, HttpResult> {
            Box::pin(async move {
                let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.0.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.0.current.fetch_sub(1, Ordering::SeqCst);
                Ok(HttpResponse::ok(request))
            })
        }
    }

    fn setup(maximum: usize) -> (LoaderChain, LoaderHandle, Arc<ThrottledLoader>, Arc<Gauge>) {
        let gauge = Arc::new(Gauge::default());
        let throttle = Arc::new(ThrottledLoader::new(maximum));
        let chain = LoaderChain::new();
        let head = chain.register_shared(throttle.clone());
        let tail = chain.register(Measured(gauge.clone()));
        chain.link(&[head, tail]);
        (chain, head, throttle, gauge)
    }

    #[tokio::test]
    async fn test_limits_concurrency() {
        let (chain, head, throttle, gauge) = setup(2);

        let loads = (0..6).map(|_| chain.load(head, HttpRequest::new(), RequestToken::new()));
        let results = futures_util::future::join_all(loads).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.ongoing(), 0);
    }

    #[tokio::test]
    async fn test_unthrottled_requests_bypass_limit() {
        let (chain, head, _throttle, gauge) = setup(1);

        let loads = (0..3).map(|_| {
            let request = HttpRequest::new().with_option::<ThrottleOption>(ThrottleBehavior::Unthrottled);
            chain.load(head, request, RequestToken::new())
        });
        futures_util::future::join_all(loads).await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_paused_loader_resumes_when_raised() {
        let (chain, head, throttle, _gauge) = setup(0);

        let pending = tokio::spawn({
            let chain = chain.clone();
            async move { chain.load(head, HttpRequest::new(), RequestToken::new()).await }
        });

        while throttle.pending() == 0 {
            tokio::task::yield_now().await;
        }
        throttle.set_maximum(1);

        let result = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_consume_capacity() {
        let (chain, head, throttle, _gauge) = setup(0);
        let token = RequestToken::new();

        let waiting = tokio::spawn({
            let chain = chain.clone();
            let token = token.clone();
            async move { chain.load(head, HttpRequest::new(), token).await }
        });
        while throttle.pending() == 0 {
            tokio::task::yield_now().await;
        }

        token.cancel();
        let error = waiting.await.unwrap().unwrap_err();
        assert_eq!(error.code(), ErrorCode::Cancelled);

        throttle.set_maximum(1);
        assert_eq!(throttle.ongoing(), 0);
        chain.load(head, HttpRequest::new(), RequestToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_waiter_hands_back_granted_capacity() {
        let (chain, head, throttle, _gauge) = setup(0);

        let mut waiting = Box::pin(chain.load(head, HttpRequest::new(), RequestToken::new()));
        let polled = tokio::time::timeout(Duration::from_millis(10), &mut waiting).await;
        assert!(polled.is_err());
        assert_eq!(throttle.pending(), 1);

        // Capacity goes to the queued load, which is dropped before it runs.
        throttle.set_maximum(1);
        assert_eq!(throttle.ongoing(), 1);
        drop(waiting);
        assert_eq!(throttle.ongoing(), 0);

        let next = tokio::time::timeout(
            Duration::from_secs(1),
            chain.load(head, HttpRequest::new(), RequestToken::new()),
        )
        .await;
        assert!(next.unwrap().is_ok());
        assert_eq!(throttle.ongoing(), 0);
    }

    #[tokio::test]
    async fn test_dropped_running_load_releases_capacity() {
        let (chain, head, throttle, _gauge) = setup(1);

        let running = tokio::time::timeout(
            Duration::from_millis(5),
            chain.load(head, HttpRequest::new(), RequestToken::new()),
        )
        .await;
        assert!(running.is_err());
        assert_eq!(throttle.ongoing(), 0);

        chain.load(head, HttpRequest::new(), RequestToken::new()).await.unwrap();
        assert_eq!(throttle.ongoing(), 0);
    }
}
