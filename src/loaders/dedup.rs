use crate::chain::{Loader, Next};
use crate::error::{ErrorCode, HttpError};
use crate::headers::HeaderName;
use crate::options::DeduplicationIdentifier;
use crate::request::RequestId;
use crate::response::{HttpResult, HttpResultExt};
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

struct InFlight {
    original: RequestId,
    waiters: Vec<oneshot::Sender<HttpResult>>,
}

/// Collapses concurrent requests that share a
/// [`DeduplicationIdentifier`](crate::options::DeduplicationIdentifier).
///
/// The first request with a given identifier is forwarded; any request with
/// the same identifier arriving before it finishes waits for its result
/// instead. Waiters get that result re-homed onto their own request, with an
/// `X-HTTP-Original-Request-ID` header naming the request that was actually
/// sent. Requests without an identifier pass straight through.
#[derive(Default)]
pub struct DeduplicatingLoader {
    in_flight: Mutex<HashMap<String, InFlight>>,
}

enum Role {
    Original,
    Waiter(RequestId, oneshot::Receiver<HttpResult>),
}

/// Removes the in-flight entry even if the original load is dropped midway,
/// so later requests are not parked behind a result that never comes.
struct Finish<'a> {
    loader: &'a DeduplicatingLoader,
    key: &'a str,
    done: bool,
}

impl Finish<'_> {
    fn complete(mut self, result: &HttpResult) {
        self.done = true;
        let waiters = self.loader.take_waiters(self.key);
        if !waiters.is_empty() {
            tracing::debug!(
                identifier = self.key,
                waiters = waiters.len(),
                "Sharing result with deduplicated requests"
            );
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.loader.take_waiters(self.key);
        }
    }
}

impl DeduplicatingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_waiters(&self, key: &str) -> Vec<oneshot::Sender<HttpResult>> {
        self.lock()
            .remove(key)
            .map(|entry| entry.waiters)
            .unwrap_or_default()
    }

    fn join(&self, key: &str, request: &HttpRequest) -> Role {
        let mut in_flight = self.lock();
        match in_flight.get_mut(key) {
            Some(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                Role::Waiter(entry.original, rx)
            }
            None => {
                in_flight.insert(
                    key.to_string(),
                    InFlight {
                        original: request.id(),
                        waiters: Vec::new(),
                    },
                );
                Role::Original
            }
        }
    }

    async fn load_deduplicated(&self, request: HttpRequest, token: RequestToken, next: Next) -> HttpResult {
        let Some(key) = request.option::<DeduplicationIdentifier>() else {
            return next.load(request, token).await;
        };

        match self.join(&key, &request) {
            Role::Original => {
                let finish = Finish {
                    loader: self,
                    key: &key,
                    done: false,
                };
                let result = next.load(request, token).await;
                finish.complete(&result);
                result
            }
            Role::Waiter(original, shared) => {
                tracing::debug!(
                    identifier = %key,
                    request_id = %request.id(),
                    original_request_id = %original,
                    "Waiting for deduplicated request"
                );

                tokio::select! {
                    biased;
                    result = shared => match result {
                        Ok(result) => result.apply_request(request).modify_response(|response| {
                            response.set_header(HeaderName::X_ORIGINAL_REQUEST_ID, Some(original.to_string()));
                        }),
                        Err(_) => Err(HttpError::new(ErrorCode::Cancelled, request)
                            .with_message("Deduplicated request was abandoned")),
                    },
                    _ = token.cancelled() => Err(HttpError::new(ErrorCode::Cancelled, request)),
                }
            }
        }
    }
}

impl Loader for DeduplicatingLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        Box::pin(self.load_deduplicated(request, token, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LoaderChain;
    use crate::HttpResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers after a short delay, counting what reaches it.
    struct Slow {
        calls: Arc<AtomicUsize>,
    }

    impl Loader for Slow {
        fn load(&self, request: HttpRequest, _token: RequestToken, _next: Next) -> BoxFuture<'_, HttpResult> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(HttpResponse::ok(request).with_body("shared"))
            })
        }
    }

    fn setup() -> (LoaderChain, crate::chain::LoaderHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = LoaderChain::new();
        let dedup = chain.register(DeduplicatingLoader::new());
        let slow = chain.register(Slow { calls: calls.clone() });
        chain.link(&[dedup, slow]);
        (chain, dedup, calls)
    }

    fn keyed(key: &str) -> HttpRequest {
        HttpRequest::new().with_option::<DeduplicationIdentifier>(Some(key.to_string()))
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let (chain, head, calls) = setup();
        let first = keyed("profile");
        let second = keyed("profile");
        let (first_id, second_id) = (first.id(), second.id());

        let (a, b) = tokio::join!(
            chain.load(head, first, RequestToken::new()),
            chain.load(head, second, RequestToken::new()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.request.id(), first_id);
        assert_eq!(b.request.id(), second_id);
        assert_eq!(b.text(), Some("shared"));
        assert_eq!(b.header(HeaderName::X_ORIGINAL_REQUEST_ID), Some(first_id.to_string().as_str()));
        assert_eq!(a.header(HeaderName::X_ORIGINAL_REQUEST_ID), None);
    }

    #[tokio::test]
    async fn test_requests_without_identifier_are_not_deduplicated() {
        let (chain, head, calls) = setup();

        let (a, b) = tokio::join!(
            chain.load(head, HttpRequest::new(), RequestToken::new()),
            chain.load(head, HttpRequest::new(), RequestToken::new()),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_detaches() {
        let (chain, head, calls) = setup();
        let waiter_token = RequestToken::new();

        let canceller = waiter_token.clone();
        let (original, waiter, _) = tokio::join!(
            chain.load(head, keyed("feed"), RequestToken::new()),
            chain.load(head, keyed("feed"), waiter_token),
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                canceller.cancel();
            },
        );

        assert!(original.is_ok());
        assert_eq!(waiter.unwrap_err().code(), ErrorCode::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_original_releases_waiters_and_identifier() {
        let (chain, head, calls) = setup();

        let (original, waiter) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(10),
                chain.load(head, keyed("feed"), RequestToken::new()),
            ),
            chain.load(head, keyed("feed"), RequestToken::new()),
        );

        assert!(original.is_err());
        assert_eq!(waiter.unwrap_err().code(), ErrorCode::Cancelled);

        let again = chain.load(head, keyed("feed"), RequestToken::new()).await.unwrap();
        assert_eq!(again.header(HeaderName::X_ORIGINAL_REQUEST_ID), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identifier_is_released_after_completion() {
        let (chain, head, calls) = setup();

        chain.load(head, keyed("once"), RequestToken::new()).await.unwrap();
        chain.load(head, keyed("once"), RequestToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
