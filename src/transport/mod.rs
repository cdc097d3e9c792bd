//! The boundary between the loader chain and the network.
//!
//! A [`Transport`] performs network operations and reports on them through
//! [`TaskEvents`] callbacks. The [`TransportAdapter`] turns that callback-style
//! interface back into one awaited [`HttpResult`] per request, and
//! [`ReqwestTransport`] is the default transport, built on `reqwest`.
//!
//! Requests cross the boundary as `http::Request<Bytes>` with an absolute URI.

mod adapter;
mod reqwest_transport;

pub use self::adapter::{TaskEvents, TransportAdapter};
pub use self::reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder};

use crate::body::DataBody;
use crate::error::{ErrorCode, HttpError};
use crate::headers::HttpHeaders;
use crate::options::SchemeOption;
use crate::{HttpRequest, HttpResponse};
use bytes::Bytes;
use http::header::{HeaderName as NativeHeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::fmt;
use url::Url;

/// Identifies one network operation of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Status line and headers of a response, before its body.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HttpHeaders,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: HttpHeaders) -> Self {
        Self { status, headers }
    }

    /// Builds a head from a native header map. Values that are not valid
    /// UTF-8 are decoded lossily.
    pub fn from_header_map(status: StatusCode, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self { status, headers }
    }

    pub(crate) fn into_response(self, request: HttpRequest) -> HttpResponse {
        HttpResponse {
            request,
            status: self.status,
            headers: self.headers,
            body: None,
        }
    }
}

/// Whether the transport should keep receiving a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Allow,
    Cancel,
}

/// A platform that performs network operations.
///
/// `start` must return promptly; the operation itself runs elsewhere and
/// reports through `events`, ending with exactly one
/// [`complete`](TaskEvents::complete) call unless it is cancelled first.
pub trait Transport: Send + Sync {
    fn start(&self, id: TaskId, request: http::Request<Bytes>, events: TaskEvents);

    /// Stops an operation. Completing a cancelled operation is harmless.
    fn cancel(&self, id: TaskId);
}

/// Converts a request into its native form.
///
/// Fails with [`ErrorCode::InvalidRequest`] when the request has no host, its
/// path is not absolute, the URL can't be built, or the body can't be encoded.
pub(crate) fn to_native(request: &HttpRequest) -> Result<http::Request<Bytes>, HttpError> {
    let invalid = |message: String| HttpError::new(ErrorCode::InvalidRequest, request.clone()).with_message(message);

    let host = match request.host.as_deref() {
        Some(host) if !host.is_empty() => host,
        _ => return Err(invalid("Request has no host".to_string())),
    };
    if host.contains(['/', '?', '#', '@']) {
        return Err(invalid(format!("Invalid host {:?}", host)));
    }

    let path = request.path.as_deref().unwrap_or("");
    if !path.is_empty() && !path.starts_with('/') {
        return Err(invalid(format!("Path {:?} must start with '/'", path)));
    }

    let scheme = request.option::<SchemeOption>();
    let mut url = Url::parse(&format!("{}://{}", scheme, host))
        .map_err(|e| invalid(format!("Could not build URL: {}", e)))?;
    url.set_path(path);
    if !request.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in request.query.iter() {
            if value.is_empty() {
                pairs.append_key_only(name);
            } else {
                pairs.append_pair(name, value);
            }
        }
    }
    url.set_fragment(request.fragment.as_deref());

    let mut headers = HeaderMap::new();
    let mut append = |name: &str, value: &str| -> Result<(), HttpError> {
        let name = NativeHeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("Invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("Invalid value for header {}: {}", name, e)))?;
        headers.append(name, value);
        Ok(())
    };

    for (name, value) in request.headers.iter() {
        append(name.as_str(), value)?;
    }

    let body = match &request.body {
        Some(body) => {
            for (name, value) in body.headers().iter() {
                append(name.as_str(), value)?;
            }
            body.bytes().map_err(|e| {
                tracing::warn!(error = %e, request_id = %request.id(), "Failed to encode request body");
                invalid(format!("Could not encode body: {}", e)).with_source(e)
            })?
        }
        None => Bytes::new(),
    };

    let mut native = http::Request::builder()
        .method(request.method.clone())
        .uri(url.as_str())
        .body(body)
        .map_err(|e| invalid(format!("Could not build request: {}", e)))?;
    *native.headers_mut() = headers;

    Ok(native)
}

/// Converts a native request (usually a proposed redirect) back into a fresh
/// request.
pub(crate) fn from_native(native: &http::Request<Bytes>) -> HttpRequest {
    let uri = native.uri();
    let mut request = HttpRequest::new().with_method(native.method().clone());

    request.host = uri.host().map(|host| match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    });
    request.path = Some(uri.path().to_string());
    request.query = uri
        .query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).collect())
        .unwrap_or_default();
    request.headers = native
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    if !native.body().is_empty() {
        request.body = Some(std::sync::Arc::new(DataBody::new(native.body().clone())));
    }

    let scheme = if uri.scheme_str() == Some("http") { "http" } else { "https" };
    request.set_option::<SchemeOption>(scheme);

    request
}
