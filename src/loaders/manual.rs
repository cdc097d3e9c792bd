use crate::chain::{Loader, Next};
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

type OnceHandler = Box<dyn FnOnce(HttpRequest, RequestToken) -> BoxFuture<'static, HttpResult> + Send>;
type DefaultHandler = Arc<dyn Fn(HttpRequest, RequestToken) -> BoxFuture<'static, HttpResult> + Send + Sync>;

#[derive(Default)]
struct Handlers {
    queue: VecDeque<OnceHandler>,
    default: Option<DefaultHandler>,
}

/// A loader answered by hand, mostly useful as the end of a chain in tests.
///
/// Each request is answered by the oldest handler queued with
/// [`then`](Self::then). With none left, the default handler answers; without
/// one, the request is forwarded.
///
/// # Examples
///
/// ```
/// use loadchain::loaders::ManualLoader;
/// use loadchain::{HttpRequest, HttpResponse};
///
/// let manual = ManualLoader::new();
/// manual
///     .then(|request, _| async move { Ok(HttpResponse::ok(request)) })
///     .then(|request, _| async move {
///         Ok(HttpResponse::new(request, http::StatusCode::SERVICE_UNAVAILABLE))
///     });
/// assert_eq!(manual.queued(), 2);
/// ```
#[derive(Default)]
pub struct ManualLoader {
    handlers: Mutex<Handlers>,
}

impl ManualLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a handler for exactly one request.
    pub fn then<F, Fut>(&self, handler: F) -> &Self
    where
        F: FnOnce(HttpRequest, RequestToken) -> Fut + Send + 'static,
        Fut: Future<Output = HttpResult> + Send + 'static,
    {
        let handler: OnceHandler = Box::new(
            move |request: HttpRequest, token: RequestToken| -> BoxFuture<'static, HttpResult> {
                Box::pin(handler(request, token))
            },
        );
        self.lock().queue.push_back(handler);
        self
    }

    /// Sets the handler used once the queue is empty.
    pub fn set_default_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(HttpRequest, RequestToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResult> + Send + 'static,
    {
        let handler: DefaultHandler = Arc::new(
            move |request: HttpRequest, token: RequestToken| -> BoxFuture<'static, HttpResult> {
                Box::pin(handler(request, token))
            },
        );
        self.lock().default = Some(handler);
    }

    /// Number of queued one-shot handlers.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }
}

impl Loader for ManualLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        let (queued, default) = {
            let mut handlers = self.lock();
            (handlers.queue.pop_front(), handlers.default.clone())
        };

        if let Some(handler) = queued {
            return handler(request, token);
        }
        if let Some(handler) = default {
            return handler(request, token);
        }
        Box::pin(async move { next.load(request, token).await })
    }
}
