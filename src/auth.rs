//! Authentication challenge handling.
//!
//! When the server answers with a challenge, the transport asks the request's
//! [`AuthenticationChallengeHandler`] how to respond. The answer is advisory:
//! the transport applies the chosen [`ChallengeResponse`].

use crate::headers::HttpHeaders;
use crate::options::HttpOption;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// The realm a challenge applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    pub host: String,
    /// Authentication scheme, e.g. `Basic`.
    pub scheme: String,
    pub realm: Option<String>,
}

impl ProtectionSpace {
    /// Parses a `WWW-Authenticate` value such as `Basic realm="api"`.
    pub fn from_header(host: impl Into<String>, value: &str) -> Self {
        let value = value.trim();
        let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));
        let realm = params.split(',').find_map(|param| {
            let (name, value) = param.trim().split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });

        Self {
            host: host.into(),
            scheme: scheme.to_string(),
            realm,
        }
    }
}

/// A challenge raised by the server for one network operation.
#[derive(Debug, Clone)]
pub struct AuthenticationChallenge {
    pub protection_space: ProtectionSpace,
    /// How many times a credential was already rejected for this operation.
    pub previous_failure_count: u32,
    /// Status of the challenging response, usually `401`.
    pub status: StatusCode,
    /// Headers of the challenging response.
    pub headers: HttpHeaders,
}

/// A user name and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the transport should answer a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeResponse {
    /// Abort the operation; it fails as cancelled.
    CancelRequest,
    /// Let the transport do what it would do without a handler.
    PerformDefaultHandling,
    /// Decline this protection space; the challenge response is returned as is.
    RejectProtectionSpace,
    /// Answer with the given credential.
    UseCredential(Credential),
}

/// Evaluates authentication challenges for a request.
pub trait AuthenticationChallengeHandler: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        challenge: &'a AuthenticationChallenge,
        request: &'a HttpRequest,
    ) -> BoxFuture<'a, ChallengeResponse>;
}

/// Answers every challenge with the same credential, giving up after it was
/// rejected once.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub Credential);

impl AuthenticationChallengeHandler for StaticCredential {
    fn evaluate<'a>(
        &'a self,
        challenge: &'a AuthenticationChallenge,
        _request: &'a HttpRequest,
    ) -> BoxFuture<'a, ChallengeResponse> {
        Box::pin(async move {
            if challenge.previous_failure_count > 0 {
                ChallengeResponse::RejectProtectionSpace
            } else {
                ChallengeResponse::UseCredential(self.0.clone())
            }
        })
    }
}

/// The challenge handler of a request. Defaults to `None`: default handling.
pub enum AuthenticationChallengeOption {}

impl HttpOption for AuthenticationChallengeOption {
    type Value = Option<Arc<dyn AuthenticationChallengeHandler>>;

    fn default_value() -> Self::Value {
        None
    }
}

impl HttpRequest {
    pub fn with_authentication_handler(
        self,
        handler: impl AuthenticationChallengeHandler + 'static,
    ) -> Self {
        self.with_option::<AuthenticationChallengeOption>(Some(Arc::new(handler)))
    }
}
