use super::{from_native, to_native, ResponseDisposition, ResponseHead, TaskId, Transport};
use crate::auth::{AuthenticationChallenge, AuthenticationChallengeOption, ChallengeResponse};
use crate::error::{ErrorCode, HttpError, TransportError};
use crate::redirect::RedirectionHandlerOption;
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::{HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;

/// Bookkeeping for one in-flight operation.
struct TaskState {
    request: HttpRequest,
    response: Option<HttpResponse>,
    data: Option<BytesMut>,
    completion: oneshot::Sender<HttpResult>,
}

impl TaskState {
    /// Resolves the waiting request. Consumes the state, so each operation
    /// resumes its caller at most once.
    fn resume(self, result: HttpResult) {
        deliver(self.completion, result);
    }

    fn finish(self, error: Option<TransportError>) {
        let TaskState {
            request,
            response,
            data,
            completion,
        } = self;

        let result = match (error, response) {
            (Some(error), response) => Err(error.into_http_error(request, response)),
            (None, Some(mut response)) => {
                response.body = data.map(BytesMut::freeze);
                Ok(response)
            }
            (None, None) => Err(HttpError::new(ErrorCode::Internal, request)
                .with_message("Task completed, but there was no response")),
        };

        deliver(completion, result);
    }
}

fn deliver(completion: oneshot::Sender<HttpResult>, result: HttpResult) {
    if completion.send(result).is_err() {
        tracing::debug!("Request stopped waiting before its task completed");
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    tasks: Mutex<HashMap<TaskId, TaskState>>,
    next_id: AtomicU64,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskState>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(&self, id: TaskId) -> Option<HttpRequest> {
        self.tasks().get(&id).map(|state| state.request.clone())
    }

    fn cancel(&self, id: TaskId) {
        let state = self.tasks().remove(&id);
        let Some(state) = state else {
            return;
        };

        tracing::debug!(task = %id, request_id = %state.request.id(), "Cancelling transport task");
        let mut error = HttpError::new(ErrorCode::Cancelled, state.request.clone());
        if let Some(response) = state.response.clone() {
            error = error.with_response(response);
        }
        state.resume(Err(error));
        self.transport.cancel(id);
    }
}

/// Bridges a callback-driven [`Transport`] to awaitable results.
///
/// Every call to [`execute`](Self::execute) starts exactly one transport
/// operation (or none, if the request can't be converted) and resolves to
/// exactly one result.
#[derive(Clone)]
pub struct TransportAdapter {
    shared: Arc<Shared>,
}

impl TransportAdapter {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.shared.tasks().len()
    }

    /// Performs one network operation for `request`.
    ///
    /// Dropping the returned future cancels the operation, the same way
    /// cancelling `token` does.
    pub async fn execute(&self, request: HttpRequest, token: RequestToken) -> HttpResult {
        let native = to_native(&request)?;

        if token.is_cancelled() {
            return Err(HttpError::new(ErrorCode::Cancelled, request));
        }

        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        tracing::debug!(
            task = %id,
            request_id = %request.id(),
            method = %native.method(),
            uri = %native.uri(),
            "Starting transport task"
        );

        self.shared.tasks().insert(
            id,
            TaskState {
                request: request.clone(),
                response: None,
                data: None,
                completion: tx,
            },
        );

        let events = TaskEvents {
            id,
            adapter: Arc::downgrade(&self.shared),
        };
        self.shared.transport.start(id, native, events);

        let adapter = Arc::downgrade(&self.shared);
        token.on_cancel(move || {
            if let Some(shared) = adapter.upgrade() {
                shared.cancel(id);
            }
        });

        let _abandon = Abandon {
            shared: &self.shared,
            id,
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(HttpError::new(ErrorCode::Internal, request)
                .with_message("Transport task ended without a result")),
        }
    }
}

/// Cancels the operation if `execute` is dropped before it resolves. Once the
/// task has left the table this does nothing.
struct Abandon<'a> {
    shared: &'a Shared,
    id: TaskId,
}

impl Drop for Abandon<'_> {
    fn drop(&mut self) {
        self.shared.cancel(self.id);
    }
}

/// Callbacks a [`Transport`] uses to report on one operation.
///
/// Holds only a weak reference to its adapter: events for an adapter that no
/// longer exists, or for an operation that already completed or was cancelled,
/// are ignored.
#[derive(Clone)]
pub struct TaskEvents {
    id: TaskId,
    adapter: Weak<Shared>,
}

impl TaskEvents {
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    fn request(&self) -> Option<HttpRequest> {
        self.adapter.upgrade()?.request(self.id)
    }

    /// Asks the request's redirection handler about a redirect.
    ///
    /// Returns the request to follow, or `None` to stop at the redirect
    /// response.
    pub async fn redirect(
        &self,
        head: ResponseHead,
        proposed: http::Request<Bytes>,
    ) -> Option<http::Request<Bytes>> {
        let original = self.request()?;
        let Some(handler) = original.option::<RedirectionHandlerOption>() else {
            return Some(proposed);
        };

        let response = head.into_response(original.clone());
        let actual = handler
            .handle_redirection(&original, &response, from_native(&proposed))
            .await;

        match actual {
            Some(actual) => match to_native(&actual) {
                Ok(native) => Some(native),
                Err(error) => {
                    tracing::warn!(task = %self.id, error = %error, "Redirection handler returned an invalid request");
                    None
                }
            },
            None => {
                tracing::debug!(task = %self.id, status = %response.status, "Redirect declined");
                None
            }
        }
    }

    /// Asks the request's authentication handler how to answer a challenge.
    pub async fn challenge(&self, challenge: AuthenticationChallenge) -> ChallengeResponse {
        let Some(original) = self.request() else {
            return ChallengeResponse::CancelRequest;
        };
        let Some(handler) = original.option::<AuthenticationChallengeOption>() else {
            return ChallengeResponse::PerformDefaultHandling;
        };
        handler.evaluate(&challenge, &original).await
    }

    /// Records the response head.
    pub fn response(&self, head: ResponseHead) -> ResponseDisposition {
        let Some(shared) = self.adapter.upgrade() else {
            return ResponseDisposition::Cancel;
        };
        let mut tasks = shared.tasks();
        let Some(state) = tasks.get_mut(&self.id) else {
            return ResponseDisposition::Cancel;
        };

        tracing::debug!(task = %self.id, status = %head.status, "Received response");
        state.response = Some(head.into_response(state.request.clone()));
        ResponseDisposition::Allow
    }

    /// Appends a chunk of the response body.
    pub fn data(&self, chunk: &[u8]) {
        let Some(shared) = self.adapter.upgrade() else {
            return;
        };
        let mut tasks = shared.tasks();
        if let Some(state) = tasks.get_mut(&self.id) {
            state.data.get_or_insert_with(BytesMut::new).extend_from_slice(chunk);
        }
    }

    /// Ends the operation, with the transport error if it failed.
    pub fn complete(&self, error: Option<TransportError>) {
        let Some(shared) = self.adapter.upgrade() else {
            return;
        };
        let state = shared.tasks().remove(&self.id);
        match state {
            Some(state) => {
                if let Some(error) = &error {
                    tracing::debug!(task = %self.id, kind = ?error.kind(), "Transport task failed");
                }
                state.finish(error);
            }
            None => tracing::debug!(task = %self.id, "Ignoring completion of a finished task"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use http::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Completes every task from inside `start`, the way a scripted transport would.
    struct Immediate {
        status: Option<StatusCode>,
        chunks: Vec<&'static [u8]>,
        error: Option<TransportErrorKind>,
        started: AtomicUsize,
    }

    impl Immediate {
        fn new(status: Option<StatusCode>) -> Self {
            Self {
                status,
                chunks: Vec::new(),
                error: None,
                started: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for Immediate {
        fn start(&self, _id: TaskId, _request: http::Request<Bytes>, events: TaskEvents) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.status {
                events.response(ResponseHead::new(status, Default::default()));
            }
            for chunk in &self.chunks {
                events.data(chunk);
            }
            events.complete(self.error.map(TransportError::new));
        }

        fn cancel(&self, _id: TaskId) {}
    }

    /// Never completes on its own.
    #[derive(Default)]
    struct Hanging {
        cancelled: Mutex<Vec<TaskId>>,
    }

    impl Transport for Hanging {
        fn start(&self, _id: TaskId, _request: http::Request<Bytes>, _events: TaskEvents) {}

        fn cancel(&self, id: TaskId) {
            self.cancelled.lock().unwrap().push(id);
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new().with_host("example.test").with_path("/items")
    }

    #[tokio::test]
    async fn test_chunks_are_accumulated_in_order() {
        let mut transport = Immediate::new(Some(StatusCode::OK));
        transport.chunks = vec![&b"{\"n\""[..], &b":1}"[..]];
        let adapter = TransportAdapter::new(transport);

        let response = adapter.execute(request(), RequestToken::new()).await.unwrap();
        assert_eq!(response.body.as_deref(), Some(&b"{\"n\":1}"[..]));
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_completion_without_response_is_internal() {
        let adapter = TransportAdapter::new(Immediate::new(None));
        let error = adapter.execute(request(), RequestToken::new()).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_transport_error_is_mapped() {
        let mut transport = Immediate::new(Some(StatusCode::OK));
        transport.error = Some(TransportErrorKind::TimedOut);
        let adapter = TransportAdapter::new(transport);

        let error = adapter.execute(request(), RequestToken::new()).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::TimedOut);
        assert_eq!(error.response().map(|r| r.status), Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_invalid_request_starts_no_task() {
        let transport = Arc::new(Immediate::new(Some(StatusCode::OK)));
        let adapter = TransportAdapter::from_shared(transport.clone());

        let error = adapter
            .execute(HttpRequest::new().with_path("/items"), RequestToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidRequest);
        assert_eq!(transport.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_resolves_once_and_cancels_task() {
        let transport = Arc::new(Hanging::default());
        let adapter = TransportAdapter::from_shared(transport.clone());
        let token = RequestToken::new();

        let pending = tokio::spawn({
            let adapter = adapter.clone();
            let token = token.clone();
            async move { adapter.execute(request(), token).await }
        });

        while adapter.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        token.cancel();

        let error = pending.await.unwrap().unwrap_err();
        assert_eq!(error.code(), ErrorCode::Cancelled);
        assert_eq!(transport.cancelled.lock().unwrap().len(), 1);
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_execute_cancels_task() {
        let transport = Arc::new(Hanging::default());
        let adapter = TransportAdapter::from_shared(transport.clone());
        let token = RequestToken::new();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), adapter.execute(request(), token.clone())).await;
        assert!(timed_out.is_err());

        assert_eq!(adapter.in_flight(), 0);
        assert_eq!(transport.cancelled.lock().unwrap().len(), 1);

        // The token's handler finds nothing left to cancel.
        token.cancel();
        assert_eq!(transport.cancelled.lock().unwrap().len(), 1);
    }
}
