//! Responses and the result type every loader resolves to.
//!
//! An [`HttpResponse`] keeps the request it answers, its status, headers in
//! wire order and the accumulated body bytes. Loaders pass around an
//! [`HttpResult`], and [`HttpResultExt`] adds the helpers they need to inspect
//! or rewrite it without caring whether it succeeded.

use crate::error::{ErrorCode, HttpError};
use crate::headers::{HeaderName, HttpHeaders};
use crate::request::{write_body, HttpRequest};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::fmt;

/// The outcome of loading a request.
///
/// Note that a non-2xx status is still a *successful* load: failures are
/// reserved for requests that did not produce a usable response at all.
pub type HttpResult = std::result::Result<HttpResponse, HttpError>;

/// A response received for an [`HttpRequest`].
///
/// # Examples
///
/// ```
/// use loadchain::{HttpRequest, HttpResponse};
/// use http::StatusCode;
///
/// let response = HttpResponse::new(HttpRequest::new(), StatusCode::CREATED)
///     .with_header("Content-Type", "application/json")
///     .with_body(r#"{"id":7}"#);
///
/// assert_eq!(response.header("content-type"), Some("application/json"));
///
/// let value: serde_json::Value = response.json().unwrap();
/// assert_eq!(value["id"], 7);
/// ```
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The request this response answers.
    pub request: HttpRequest,

    pub status: StatusCode,

    /// Response headers, multi-valued and in the order they were received.
    pub headers: HttpHeaders,

    /// The accumulated body, if any bytes were received.
    pub body: Option<Bytes>,
}

impl HttpResponse {
    pub fn new(request: HttpRequest, status: StatusCode) -> Self {
        Self {
            request,
            status,
            headers: HttpHeaders::new(),
            body: None,
        }
    }

    /// A bodiless `200 OK` response.
    pub fn ok(request: HttpRequest) -> Self {
        Self::new(request, StatusCode::OK)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the first value of a header.
    pub fn header(&self, name: impl Into<HeaderName>) -> Option<&str> {
        self.headers.first(name)
    }

    pub fn set_header(&mut self, name: impl Into<HeaderName>, value: Option<impl Into<String>>) {
        self.headers.set(name, value);
    }

    /// Returns the body as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|body| std::str::from_utf8(body).ok())
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorCode::CannotDecodeResponse`] error carrying this
    /// response if the body is missing or does not decode as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let body = self.body.as_deref().unwrap_or_default();
        serde_json::from_slice(body).map_err(|e| {
            tracing::error!(
                error = %e,
                status = self.status.as_u16(),
                "Failed to deserialize response"
            );
            HttpError::new(ErrorCode::CannotDecodeResponse, self.request.clone())
                .with_response(self.clone())
                .with_message(e.to_string())
                .with_source(e)
        })
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        for (name, value) in self.headers.iter() {
            write!(f, "\n{}: {}", name, value)?;
        }
        if let Some(body) = &self.body {
            f.write_str("\n\n")?;
            write_body(f, body)?;
        }
        Ok(())
    }
}

/// A successful, bodiless `200 OK` result for `request`.
pub fn ok(request: HttpRequest) -> HttpResult {
    Ok(HttpResponse::ok(request))
}

/// A failed result for `request`.
pub fn failure(code: ErrorCode, request: HttpRequest) -> HttpResult {
    Err(HttpError::new(code, request))
}

pub fn internal_server_error(request: HttpRequest) -> HttpResult {
    Ok(HttpResponse::new(request, StatusCode::INTERNAL_SERVER_ERROR))
}

/// Helpers shared by successful and failed results.
pub trait HttpResultExt {
    /// The request the result belongs to.
    fn request(&self) -> &HttpRequest;

    /// The response, or the partial response carried by an error.
    fn response(&self) -> Option<&HttpResponse>;

    fn is_failure(&self) -> bool;

    /// Re-homes the result onto another request, keeping status, headers,
    /// body and error details.
    fn apply_request(self, request: HttpRequest) -> Self;

    /// Modifies the response, or the partial response of a failure. Failures
    /// without a response are returned unchanged.
    fn modify_response(self, modify: impl FnOnce(&mut HttpResponse)) -> Self;
}

impl HttpResultExt for HttpResult {
    fn request(&self) -> &HttpRequest {
        match self {
            Ok(response) => &response.request,
            Err(error) => error.request(),
        }
    }

    fn response(&self) -> Option<&HttpResponse> {
        match self {
            Ok(response) => Some(response),
            Err(error) => error.response(),
        }
    }

    fn is_failure(&self) -> bool {
        self.is_err()
    }

    fn apply_request(self, request: HttpRequest) -> Self {
        match self {
            Ok(response) => Ok(HttpResponse {
                request,
                ..response
            }),
            Err(error) => Err(error.rehome(request)),
        }
    }

    fn modify_response(self, modify: impl FnOnce(&mut HttpResponse)) -> Self {
        match self {
            Ok(mut response) => {
                modify(&mut response);
                Ok(response)
            }
            Err(mut error) => {
                if let Some(response) = error.response_mut() {
                    modify(response);
                }
                Err(error)
            }
        }
    }
}
