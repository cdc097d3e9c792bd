//! Error types for the loader pipeline.
//!
//! Every failure that reaches a caller is an [`HttpError`] carrying one code from
//! the closed [`ErrorCode`] taxonomy, the request it belongs to and, when one was
//! observed, the partial response. Transport-level failures are described by a
//! [`TransportError`] and mapped onto the taxonomy exactly once, at the adapter
//! boundary, through [`ErrorCode::from`].

use crate::{HttpRequest, HttpResponse};
use std::fmt;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// The closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request was cancelled through its token or by the transport.
    Cancelled,
    /// The request was malformed or its body could not be encoded.
    InvalidRequest,
    /// DNS, connection or reachability failure.
    CannotConnect,
    /// TLS or certificate failure.
    InsecureConnection,
    CannotAuthenticate,
    TimedOut,
    /// The server's response was malformed, empty or too large.
    InvalidResponse,
    /// The response body could not be decoded.
    CannotDecodeResponse,
    /// An operation completed with neither an error nor a response.
    Internal,
    /// A transport error with no mapping.
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::CannotConnect => "Cannot connect",
            ErrorCode::InsecureConnection => "Insecure connection",
            ErrorCode::CannotAuthenticate => "Cannot authenticate",
            ErrorCode::TimedOut => "Timed out",
            ErrorCode::InvalidResponse => "Invalid response",
            ErrorCode::CannotDecodeResponse => "Cannot decode response",
            ErrorCode::Internal => "Internal",
            ErrorCode::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request.
///
/// # Examples
///
/// ```
/// use loadchain::{ErrorCode, HttpError, HttpRequest};
///
/// let request = HttpRequest::new();
/// let error = HttpError::new(ErrorCode::TimedOut, request).with_message("gave up after 30s");
///
/// assert_eq!(error.code(), ErrorCode::TimedOut);
/// assert_eq!(error.to_string(), "Timed out: gave up after 30s");
/// ```
#[derive(thiserror::Error, Debug, Clone)]
#[error("{}", self.summary())]
pub struct HttpError {
    code: ErrorCode,
    request: HttpRequest,
    response: Option<HttpResponse>,
    message: Option<String>,
    #[source]
    source: Option<SharedError>,
}

impl HttpError {
    pub fn new(code: ErrorCode, request: HttpRequest) -> Self {
        Self {
            code,
            request,
            response: None,
            message: None,
            source: None,
        }
    }

    /// Attaches the (partial) response observed before the failure.
    pub fn with_response(mut self, response: HttpResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Preserves the underlying error for diagnostics.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        let source: BoxError = source.into();
        self.source = Some(Arc::from(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    /// Rebuilds this error around a different request, keeping everything else.
    pub(crate) fn rehome(self, request: HttpRequest) -> Self {
        Self { request, ..self }
    }

    pub(crate) fn response_mut(&mut self) -> Option<&mut HttpResponse> {
        self.response.as_mut()
    }

    fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.code, message),
            None => self.code.to_string(),
        }
    }

    /// Returns a multi-line report with the request, response and underlying error.
    pub fn report(&self) -> String {
        let mut lines = vec![self.summary(), "REQUEST:".to_string()];
        lines.push(self.request.to_string());

        if let Some(response) = &self.response {
            lines.push(String::new());
            lines.push("RESPONSE:".to_string());
            lines.push(response.to_string());
        }

        if let Some(source) = &self.source {
            lines.push(String::new());
            lines.push("UNDERLYING ERROR:".to_string());
            lines.push(source.to_string());
        }

        lines.join("\n")
    }
}

/// Error identifiers reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Cancelled,
    UserCancelledAuthentication,

    BadUrl,
    UnsupportedUrl,
    RequestBodyStreamExhausted,

    CannotFindHost,
    CannotConnectToHost,
    NetworkConnectionLost,
    DnsLookupFailed,
    TooManyRedirects,
    NotConnectedToInternet,
    RedirectToNonExistentLocation,

    SecureConnectionFailed,
    ServerCertificateUntrusted,
    ServerCertificateHasBadDate,
    ServerCertificateHasUnknownRoot,
    ServerCertificateNotYetValid,
    ClientCertificateRejected,
    ClientCertificateRequired,

    UserAuthenticationRequired,

    TimedOut,

    BadServerResponse,
    CannotParseResponse,
    ZeroByteResource,
    ResourceUnavailable,
    DataLengthExceedsMaximum,

    CannotDecodeRawData,
    CannotDecodeContentData,
    DecodingFailedMidStream,

    /// Anything the transport could not classify.
    Other,
}

impl From<TransportErrorKind> for ErrorCode {
    fn from(kind: TransportErrorKind) -> Self {
        use TransportErrorKind as K;

        match kind {
            K::Cancelled | K::UserCancelledAuthentication => ErrorCode::Cancelled,

            K::BadUrl | K::UnsupportedUrl | K::RequestBodyStreamExhausted => {
                ErrorCode::InvalidRequest
            }

            K::CannotFindHost
            | K::CannotConnectToHost
            | K::NetworkConnectionLost
            | K::DnsLookupFailed
            | K::TooManyRedirects
            | K::NotConnectedToInternet
            | K::RedirectToNonExistentLocation => ErrorCode::CannotConnect,

            K::SecureConnectionFailed
            | K::ServerCertificateUntrusted
            | K::ServerCertificateHasBadDate
            | K::ServerCertificateHasUnknownRoot
            | K::ServerCertificateNotYetValid
            | K::ClientCertificateRejected
            | K::ClientCertificateRequired => ErrorCode::InsecureConnection,

            K::UserAuthenticationRequired => ErrorCode::CannotAuthenticate,

            K::TimedOut => ErrorCode::TimedOut,

            K::BadServerResponse
            | K::CannotParseResponse
            | K::ZeroByteResource
            | K::ResourceUnavailable
            | K::DataLengthExceedsMaximum => ErrorCode::InvalidResponse,

            K::CannotDecodeRawData | K::CannotDecodeContentData | K::DecodingFailedMidStream => {
                ErrorCode::CannotDecodeResponse
            }

            K::Other => ErrorCode::Unknown,
        }
    }
}

/// A failure reported by the transport for one operation.
#[derive(thiserror::Error, Debug)]
#[error("transport error ({kind:?})")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Converts this transport failure into an [`HttpError`] for `request`.
    pub(crate) fn into_http_error(
        self,
        request: HttpRequest,
        response: Option<HttpResponse>,
    ) -> HttpError {
        let mut error = HttpError::new(ErrorCode::from(self.kind), request);
        if let Some(response) = response {
            error = error.with_response(response);
        }
        error.with_source(self)
    }
}

/// A failure producing a request body.
#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("Failed to encode JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Streaming bodies are not supported")]
    Unsupported,
}

/// A specialized `Result` type for fallible non-request operations.
pub type Result<T> = std::result::Result<T, HttpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_transport_kinds_map_to_codes() {
        assert_eq!(
            ErrorCode::from(TransportErrorKind::DnsLookupFailed),
            ErrorCode::CannotConnect
        );
        assert_eq!(
            ErrorCode::from(TransportErrorKind::ServerCertificateUntrusted),
            ErrorCode::InsecureConnection
        );
        assert_eq!(
            ErrorCode::from(TransportErrorKind::UserCancelledAuthentication),
            ErrorCode::Cancelled
        );
        assert_eq!(
            ErrorCode::from(TransportErrorKind::ZeroByteResource),
            ErrorCode::InvalidResponse
        );
        assert_eq!(ErrorCode::from(TransportErrorKind::Other), ErrorCode::Unknown);
    }

    #[test]
    fn test_transport_error_is_kept_as_source() {
        let request = HttpRequest::new();
        let error = TransportError::new(TransportErrorKind::TimedOut).into_http_error(request, None);

        assert_eq!(error.code(), ErrorCode::TimedOut);
        assert!(error.source().is_some());
        assert!(error.report().contains("UNDERLYING ERROR:"));
    }

    #[test]
    fn test_display_without_message() {
        let error = HttpError::new(ErrorCode::Internal, HttpRequest::new());
        assert_eq!(error.to_string(), "Internal");
        assert!(error.message().is_none());
    }
}
