use crate::chain::{Loader, Next};
use crate::error::{ErrorCode, HttpError};
use crate::headers::HeaderName;
use crate::response::{HttpResult, HttpResultExt};
use crate::retry::RetryStrategyOption;
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;

/// Re-sends failed requests according to their
/// [`RetryStrategy`](crate::retry::RetryStrategy).
///
/// Requests without a strategy are forwarded once. The final result carries an
/// `X-HTTP-Retry-Count` header with the number of retries performed.
#[derive(Debug, Default)]
pub struct RetryLoader;

impl RetryLoader {
    pub fn new() -> Self {
        Self
    }

    async fn load_with_retries(&self, request: HttpRequest, token: RequestToken, next: Next) -> HttpResult {
        let mut strategy = request.option::<RetryStrategyOption>();
        let mut retries: usize = 0;

        let result = loop {
            if token.is_cancelled() {
                break Err(HttpError::new(ErrorCode::Cancelled, request.clone()));
            }

            let result = next.load(request.clone(), token.clone()).await;
            if matches!(&result, Err(e) if e.is_cancelled()) {
                break result;
            }

            let Some(delay) = strategy.as_mut().and_then(|s| s.next_delay(&result)) else {
                break result;
            };

            retries += 1;
            match &result {
                Ok(response) => tracing::info!(
                    request_id = %request.id(),
                    status = response.status.as_u16(),
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying request after delay"
                ),
                Err(error) => tracing::info!(
                    request_id = %request.id(),
                    error = %error,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying request after delay"
                ),
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {
                        break Err(HttpError::new(ErrorCode::Cancelled, request.clone())
                            .with_message("Cancelled while waiting to retry"));
                    }
                }
            }
        };

        result.modify_response(|response| {
            response.set_header(HeaderName::X_RETRY_COUNT, Some(retries.to_string()));
        })
    }
}

impl Loader for RetryLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        Box::pin(self.load_with_retries(request, token, next))
    }
}
