//! The pipeline root.
//!
//! A [`Client`] owns a [`LoaderChain`] and the order its loaders were linked
//! in. Use [`ClientBuilder`] to assemble one.

use crate::chain::{Loader, LoaderChain, LoaderHandle};
use crate::error::{ErrorCode, HttpError};
use crate::loaders::TransportLoader;
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::transport::Transport;
use crate::HttpRequest;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Submits requests to a chain of loaders.
///
/// The client is cheap to clone; clones share the same chain.
///
/// # Examples
///
/// ```no_run
/// use loadchain::loaders::{DeduplicatingLoader, RetryLoader, ThrottledLoader};
/// use loadchain::retry::BackoffRetry;
/// use loadchain::transport::ReqwestTransport;
/// use loadchain::{Client, HttpRequest};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::builder()
///     .loader(RetryLoader::new())
///     .loader(DeduplicatingLoader::new())
///     .loader(ThrottledLoader::new(8))
///     .transport(ReqwestTransport::new()?)
///     .build();
///
/// let request = HttpRequest::from_url(http::Method::GET, "https://api.example.com/users/123")?
///     .with_retry_strategy(BackoffRetry::exponential(3).with_jitter());
///
/// let response = client.load(request).await?;
/// println!("{}", response.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    chain: LoaderChain,
    handles: Mutex<Vec<LoaderHandle>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn handles(&self) -> MutexGuard<'_, Vec<LoaderHandle>> {
        self.inner.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The registry holding this client's loaders, for manual wiring.
    pub fn chain(&self) -> &LoaderChain {
        &self.inner.chain
    }

    /// The first loader requests are submitted to.
    pub fn head(&self) -> Option<LoaderHandle> {
        self.handles().first().copied()
    }

    /// Submits `request` at the head of the chain.
    ///
    /// Cancelling `token` cancels the request wherever it currently is.
    pub async fn submit(&self, request: HttpRequest, token: RequestToken) -> HttpResult {
        let Some(head) = self.head() else {
            return Err(HttpError::new(ErrorCode::CannotConnect, request)
                .with_message("Client has no loaders"));
        };

        let request_id = request.id();
        let start_time = Instant::now();
        tracing::debug!(
            request_id = %request_id,
            method = %request.method,
            host = request.host.as_deref().unwrap_or_default(),
            path = request.path.as_deref().unwrap_or_default(),
            "Submitting request"
        );

        let result = self.inner.chain.load(head, request, token).await;
        let latency_ms = start_time.elapsed().as_millis();

        match &result {
            Ok(response) => tracing::info!(
                request_id = %request_id,
                status = response.status.as_u16(),
                latency_ms = latency_ms,
                "Request completed"
            ),
            Err(error) if error.is_cancelled() => tracing::debug!(
                request_id = %request_id,
                latency_ms = latency_ms,
                "Request cancelled"
            ),
            Err(error) => tracing::warn!(
                request_id = %request_id,
                error = %error,
                latency_ms = latency_ms,
                "Request failed"
            ),
        }

        result
    }

    /// Submits `request` with a fresh token.
    pub async fn load(&self, request: HttpRequest) -> HttpResult {
        self.submit(request, RequestToken::new()).await
    }

    /// Unregisters every loader. Requests submitted afterwards fail with
    /// [`ErrorCode::CannotConnect`]; requests in flight finish normally.
    pub fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles());
        for handle in handles {
            self.inner.chain.unregister(handle);
        }
        tracing::debug!("Client shut down");
    }
}

/// Builder for configuring a [`Client`].
///
/// Loaders are linked in the order they are added; the transport, if any,
/// always comes last.
#[derive(Default)]
pub struct ClientBuilder {
    loaders: Vec<Arc<dyn Loader>>,
    transport: Option<Arc<dyn Loader>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a loader to the chain.
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Appends a loader that is shared with other owners, such as a
    /// [`ThrottledLoader`](crate::loaders::ThrottledLoader) whose limit is
    /// adjusted at runtime.
    pub fn shared_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Ends the chain with a [`TransportLoader`] over `transport`.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(TransportLoader::new(transport)));
        self
    }

    /// Builds the configured `Client`.
    pub fn build(self) -> Client {
        let chain = LoaderChain::new();
        let handles: Vec<_> = self
            .loaders
            .into_iter()
            .chain(self.transport)
            .map(|loader| chain.register_shared(loader))
            .collect();
        chain.link(&handles);

        tracing::debug!(loaders = handles.len(), "Built client");

        Client {
            inner: Arc::new(ClientInner {
                chain,
                handles: Mutex::new(handles),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::{ManualLoader, ModifyingLoader};
    use crate::HttpResponse;

    #[tokio::test]
    async fn test_client_without_loaders_cannot_connect() {
        let client = Client::builder().build();
        let error = client.load(HttpRequest::new()).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::CannotConnect);
    }

    #[tokio::test]
    async fn test_loaders_are_linked_in_order() {
        let manual = ManualLoader::new();
        manual.set_default_handler(|request, _| async move { Ok(HttpResponse::ok(request)) });

        let client = Client::builder()
            .loader(ModifyingLoader::new().map_request(|r| r.set_header("X-Stage", Some("modified"))))
            .loader(manual)
            .build();

        let response = client.load(HttpRequest::new()).await.unwrap();
        assert_eq!(response.request.header("x-stage"), Some("modified"));

        let head = client.head().unwrap();
        assert!(client.chain().next_loader(head).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_unregisters_loaders() {
        let manual = ManualLoader::new();
        manual.set_default_handler(|request, _| async move { Ok(HttpResponse::ok(request)) });

        let client = Client::builder().loader(manual).build();
        let head = client.head().unwrap();
        client.shutdown();

        assert!(!client.chain().contains(head));
        assert_eq!(client.load(HttpRequest::new()).await.unwrap_err().code(), ErrorCode::CannotConnect);
    }
}
