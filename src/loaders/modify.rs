use crate::chain::{Loader, Next};
use crate::error::{ErrorCode, HttpError};
use crate::response::{HttpResult, HttpResultExt};
use crate::token::RequestToken;
use crate::{HttpRequest, HttpResponse};
use futures_util::future::BoxFuture;
use std::sync::Arc;

type RequestModifier = Arc<dyn Fn(&mut HttpRequest) + Send + Sync>;
type ResultModifier = Arc<dyn Fn(&mut HttpResult) + Send + Sync>;

/// Rewrites requests on their way down the chain and results on their way up.
///
/// A modifier may change anything about a request or result except its
/// identity: swapping in an unrelated request fails with
/// [`ErrorCode::InvalidRequest`], and swapping in a result for another request
/// fails with [`ErrorCode::InvalidResponse`].
///
/// # Examples
///
/// ```
/// use loadchain::loaders::ModifyingLoader;
///
/// let versioned = ModifyingLoader::new()
///     .map_request(|request| request.set_header("Accept-Version", Some("2")))
///     .map_response(|response| {
///         response.headers.remove("Set-Cookie");
///     });
/// ```
#[derive(Clone, Default)]
pub struct ModifyingLoader {
    request_modifier: Option<RequestModifier>,
    result_modifier: Option<ResultModifier>,
}

impl ModifyingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `modify` on each request before forwarding it.
    pub fn map_request(mut self, modify: impl Fn(&mut HttpRequest) + Send + Sync + 'static) -> Self {
        self.request_modifier = Some(Arc::new(modify));
        self
    }

    /// Runs `modify` on each result, successful or not.
    pub fn map_result(mut self, modify: impl Fn(&mut HttpResult) + Send + Sync + 'static) -> Self {
        self.result_modifier = Some(Arc::new(modify));
        self
    }

    /// Runs `modify` on each successful response. Failures pass through untouched.
    pub fn map_response(self, modify: impl Fn(&mut HttpResponse) + Send + Sync + 'static) -> Self {
        self.map_result(move |result| {
            if let Ok(response) = result {
                modify(response);
            }
        })
    }

    async fn load_modified(&self, request: HttpRequest, token: RequestToken, next: Next) -> HttpResult {
        let original = request.id();
        let mut request = request;
        if let Some(modify) = &self.request_modifier {
            modify(&mut request);
        }

        if request.id() != original {
            return Err(HttpError::new(ErrorCode::InvalidRequest, request).with_message(format!(
                "Request with id {} was replaced with an entirely distinct request",
                original
            )));
        }

        let mut result = next.load(request, token).await;
        let Some(modify) = &self.result_modifier else {
            return result;
        };

        let answered = result.request().id();
        modify(&mut result);

        if result.request().id() != answered {
            let mut error = HttpError::new(ErrorCode::InvalidResponse, result.request().clone())
                .with_message(format!(
                    "Result for request id {} was replaced with an entirely distinct result",
                    original
                ));
            if let Some(response) = result.response() {
                error = error.with_response(response.clone());
            }
            return Err(error);
        }

        result
    }
}

impl Loader for ModifyingLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        Box::pin(self.load_modified(request, token, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LoaderChain;
    use crate::loaders::ManualLoader;
    use http::StatusCode;

    async fn run(modifier: ModifyingLoader, manual: ManualLoader) -> HttpResult {
        let chain = LoaderChain::new();
        let head = chain.register(modifier);
        let tail = chain.register(manual);
        chain.link(&[head, tail]);
        chain.load(head, HttpRequest::new(), RequestToken::new()).await
    }

    #[tokio::test]
    async fn test_request_modification_reaches_next_loader() {
        let manual = ManualLoader::new();
        manual.then(|request, _| async move {
            assert_eq!(request.path.as_deref(), Some("/test"));
            Ok(HttpResponse::ok(request))
        });

        let modifier = ModifyingLoader::new().map_request(|request| request.path = Some("/test".into()));
        assert!(run(modifier, manual).await.is_ok());
    }

    #[tokio::test]
    async fn test_response_modification() {
        let manual = ManualLoader::new();
        manual.then(|request, _| async move {
            Ok(HttpResponse::new(request, StatusCode::INTERNAL_SERVER_ERROR))
        });

        let modifier = ModifyingLoader::new().map_response(|response| response.status = StatusCode::OK);
        assert_eq!(run(modifier, manual).await.unwrap().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_response_modifier_skips_failures() {
        let manual = ManualLoader::new();
        manual.then(|request, _| async move { Err(HttpError::new(ErrorCode::Internal, request)) });

        let modifier = ModifyingLoader::new().map_response(|_| panic!("must not run on failures"));
        assert_eq!(run(modifier, manual).await.unwrap_err().code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_replacing_request_is_rejected() {
        let manual = ManualLoader::new();
        manual.then(|request, _| async move { Ok(HttpResponse::ok(request)) });

        let modifier = ModifyingLoader::new().map_request(|request| *request = HttpRequest::new());
        let error = run(modifier, manual).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_replacing_result_is_rejected() {
        let manual = ManualLoader::new();
        manual.then(|request, _| async move { Ok(HttpResponse::ok(request)) });

        let modifier = ModifyingLoader::new()
            .map_result(|result| *result = Ok(HttpResponse::ok(HttpRequest::new())));
        let error = run(modifier, manual).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidResponse);
    }
}
