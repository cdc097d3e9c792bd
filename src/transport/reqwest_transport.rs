use super::{ResponseDisposition, ResponseHead, TaskEvents, TaskId, Transport};
use crate::auth::{AuthenticationChallenge, ChallengeResponse, Credential, ProtectionSpace};
use crate::error::{TransportError, TransportErrorKind};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use url::Url;

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// The default [`Transport`], performing requests with `reqwest` on the tokio
/// runtime.
///
/// Each operation runs in its own tokio task. Redirects and authentication
/// challenges are surfaced through [`TaskEvents`] instead of being handled by
/// `reqwest`, and response bodies are streamed to the adapter chunk by chunk.
///
/// # Examples
///
/// ```no_run
/// use loadchain::transport::ReqwestTransport;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), loadchain::TransportError> {
/// let transport = ReqwestTransport::builder()
///     .timeout(Duration::from_secs(30))
///     .max_redirects(5)
///     .user_agent("inventory-sync/2.1")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_redirects: usize,
    tasks: Arc<Mutex<HashMap<TaskId, AbortHandle>>>,
}

impl ReqwestTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend can't be initialized.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }
}

fn lock(tasks: &Mutex<HashMap<TaskId, AbortHandle>>) -> MutexGuard<'_, HashMap<TaskId, AbortHandle>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

impl Transport for ReqwestTransport {
    fn start(&self, id: TaskId, request: http::Request<Bytes>, events: TaskEvents) {
        let client = self.client.clone();
        let max_redirects = self.max_redirects;
        let tasks = self.tasks.clone();

        // Registered under the lock so a fast task can't finish before its
        // abort handle is stored.
        let mut running = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            let error = perform(&client, request, &events, max_redirects).await.err();
            lock(&tasks).remove(&id);
            events.complete(error);
        });
        running.insert(id, handle.abort_handle());
    }

    fn cancel(&self, id: TaskId) {
        if let Some(handle) = lock(&self.tasks).remove(&id) {
            tracing::debug!(task = %id, "Aborting reqwest task");
            handle.abort();
        }
    }
}

async fn perform(
    client: &reqwest::Client,
    mut request: http::Request<Bytes>,
    events: &TaskEvents,
    max_redirects: usize,
) -> Result<(), TransportError> {
    let mut redirects = 0;
    let mut failed_credentials = 0;
    let mut credential: Option<Credential> = None;

    loop {
        let mut builder = client
            .request(request.method().clone(), request.uri().to_string())
            .headers(request.headers().clone())
            .body(request.body().clone());
        if let Some(credential) = &credential {
            builder = builder.basic_auth(&credential.user, Some(&credential.password));
        }

        let mut response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let head = ResponseHead::from_header_map(status, response.headers());

        tracing::debug!(
            task = %events.task_id(),
            status = status.as_u16(),
            uri = %request.uri(),
            "reqwest response"
        );

        if status.is_redirection() {
            if let Some(location) = response.headers().get(LOCATION) {
                if redirects >= max_redirects {
                    return Err(TransportError::new(TransportErrorKind::TooManyRedirects));
                }
                let proposed = redirect_request(&request, status, location.as_bytes())?;
                redirects += 1;

                if let Some(next) = events.redirect(head.clone(), proposed).await {
                    request = next;
                    credential = None;
                    continue;
                }
            }
        }

        if status == StatusCode::UNAUTHORIZED {
            if let Some(value) = response.headers().get(WWW_AUTHENTICATE) {
                if credential.is_some() {
                    failed_credentials += 1;
                }
                let host = request.uri().host().unwrap_or_default().to_string();
                let challenge = AuthenticationChallenge {
                    protection_space: ProtectionSpace::from_header(
                        host,
                        &String::from_utf8_lossy(value.as_bytes()),
                    ),
                    previous_failure_count: failed_credentials,
                    status,
                    headers: head.headers.clone(),
                };

                match events.challenge(challenge).await {
                    ChallengeResponse::CancelRequest => {
                        return Err(TransportError::new(
                            TransportErrorKind::UserCancelledAuthentication,
                        ));
                    }
                    ChallengeResponse::UseCredential(next) => {
                        credential = Some(next);
                        continue;
                    }
                    ChallengeResponse::PerformDefaultHandling
                    | ChallengeResponse::RejectProtectionSpace => {}
                }
            }
        }

        if events.response(head) == ResponseDisposition::Cancel {
            return Err(TransportError::new(TransportErrorKind::Cancelled));
        }

        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            events.data(&chunk);
        }
        return Ok(());
    }
}

/// Builds the request a redirect response points to.
fn redirect_request(
    current: &http::Request<Bytes>,
    status: StatusCode,
    location: &[u8],
) -> Result<http::Request<Bytes>, TransportError> {
    let base = Url::parse(&current.uri().to_string())
        .map_err(|e| TransportError::with_source(TransportErrorKind::BadUrl, e))?;
    let target = std::str::from_utf8(location)
        .ok()
        .and_then(|location| base.join(location).ok())
        .ok_or_else(|| TransportError::new(TransportErrorKind::RedirectToNonExistentLocation))?;

    // 303 always switches to GET; 301 and 302 do so for POST, as browsers do.
    let to_get = status == StatusCode::SEE_OTHER
        || (current.method() == Method::POST
            && (status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND));

    let mut headers = current.headers().clone();
    let body = if to_get {
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        Bytes::new()
    } else {
        current.body().clone()
    };
    if target.host_str() != current.uri().host() {
        headers.remove(AUTHORIZATION);
    }

    let method = if to_get { Method::GET } else { current.method().clone() };
    let mut proposed = http::Request::builder()
        .method(method)
        .uri(target.as_str())
        .body(body)
        .map_err(|e| TransportError::with_source(TransportErrorKind::BadUrl, e))?;
    *proposed.headers_mut() = headers;
    Ok(proposed)
}

fn classify(error: reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if error.is_connect() {
        TransportErrorKind::CannotConnectToHost
    } else if error.is_redirect() {
        TransportErrorKind::TooManyRedirects
    } else if error.is_builder() {
        TransportErrorKind::BadUrl
    } else if error.is_decode() {
        TransportErrorKind::CannotDecodeContentData
    } else if error.is_body() || error.is_request() {
        TransportErrorKind::NetworkConnectionLost
    } else {
        TransportErrorKind::Other
    };

    tracing::warn!(error = %error, kind = ?kind, "reqwest request failed");
    TransportError::with_source(kind, error)
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransportBuilder {
    timeout: Option<Duration>,
    max_redirects: usize,
    user_agent: Option<String>,
}

impl ReqwestTransportBuilder {
    pub fn new() -> Self {
        Self {
            timeout: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: None,
        }
    }

    /// Sets a timeout for each request, including reading its body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how many redirects one operation may follow. Defaults to 10.
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Builds the configured `ReqwestTransport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest` client can't be built.
    pub fn build(self) -> Result<ReqwestTransport, TransportError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::with_source(TransportErrorKind::Other, e))?;

        Ok(ReqwestTransport {
            client,
            max_redirects: self.max_redirects,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(uri: &str) -> http::Request<Bytes> {
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, "Bearer abc")
            .body(Bytes::from_static(b"{}"))
            .unwrap()
    }

    #[test]
    fn test_see_other_switches_to_get() {
        let proposed = redirect_request(&post("https://a.test/x"), StatusCode::SEE_OTHER, b"/y").unwrap();
        assert_eq!(proposed.method(), Method::GET);
        assert_eq!(proposed.uri().to_string(), "https://a.test/y");
        assert!(proposed.body().is_empty());
        assert!(proposed.headers().get(CONTENT_TYPE).is_none());
        assert!(proposed.headers().get(AUTHORIZATION).is_some());
    }

    #[test]
    fn test_temporary_redirect_keeps_method_and_body() {
        let proposed =
            redirect_request(&post("https://a.test/x"), StatusCode::TEMPORARY_REDIRECT, b"https://b.test/z")
                .unwrap();
        assert_eq!(proposed.method(), Method::POST);
        assert_eq!(proposed.body().as_ref(), b"{}");
        assert!(proposed.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ReqwestTransportBuilder::new();
        assert_eq!(builder.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert!(builder.timeout.is_none());
    }
}
