//! Redirect interception.
//!
//! When the transport is about to follow a redirect, the request's
//! [`RedirectionHandler`] may approve the proposed request, rewrite it, or veto
//! it. A vetoed redirect leaves the 3xx response as the final response.

use crate::options::HttpOption;
use crate::{HttpRequest, HttpResponse};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Decides what to do with each redirect hop.
///
/// # Examples
///
/// ```
/// use futures_util::future::BoxFuture;
/// use loadchain::redirect::RedirectionHandler;
/// use loadchain::{HttpRequest, HttpResponse};
///
/// /// Follows redirects only while they stay on the original host.
/// struct SameHostOnly;
///
/// impl RedirectionHandler for SameHostOnly {
///     fn handle_redirection<'a>(
///         &'a self,
///         request: &'a HttpRequest,
///         _response: &'a HttpResponse,
///         proposed: HttpRequest,
///     ) -> BoxFuture<'a, Option<HttpRequest>> {
///         Box::pin(async move { (proposed.host == request.host).then_some(proposed) })
///     }
/// }
/// ```
pub trait RedirectionHandler: Send + Sync {
    /// Returns the request to follow, or `None` to stop at `response`.
    fn handle_redirection<'a>(
        &'a self,
        request: &'a HttpRequest,
        response: &'a HttpResponse,
        proposed: HttpRequest,
    ) -> BoxFuture<'a, Option<HttpRequest>>;
}

/// Follows every redirect as proposed. Same as having no handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowRedirects;

impl RedirectionHandler for FollowRedirects {
    fn handle_redirection<'a>(
        &'a self,
        _request: &'a HttpRequest,
        _response: &'a HttpResponse,
        proposed: HttpRequest,
    ) -> BoxFuture<'a, Option<HttpRequest>> {
        Box::pin(async move { Some(proposed) })
    }
}

/// Never follows redirects; the 3xx response is returned to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectRedirects;

impl RedirectionHandler for RejectRedirects {
    fn handle_redirection<'a>(
        &'a self,
        _request: &'a HttpRequest,
        _response: &'a HttpResponse,
        _proposed: HttpRequest,
    ) -> BoxFuture<'a, Option<HttpRequest>> {
        Box::pin(async { None })
    }
}

/// The redirection handler of a request. Defaults to `None`: follow as proposed.
pub enum RedirectionHandlerOption {}

impl HttpOption for RedirectionHandlerOption {
    type Value = Option<Arc<dyn RedirectionHandler>>;

    fn default_value() -> Self::Value {
        None
    }
}

impl HttpRequest {
    pub fn with_redirection_handler(self, handler: impl RedirectionHandler + 'static) -> Self {
        self.with_option::<RedirectionHandlerOption>(Some(Arc::new(handler)))
    }
}
