//! Ready-made pipeline stages.
//!
//! | Loader | Role |
//! |---|---|
//! | [`RetryLoader`] | re-sends failures according to the request's retry strategy |
//! | [`DeduplicatingLoader`] | shares one load between identical concurrent requests |
//! | [`ThrottledLoader`] | caps the number of concurrent requests |
//! | [`ModifyingLoader`] | rewrites requests and results |
//! | [`EnvironmentLoader`] | fills in host, path prefix, query and headers |
//! | [`ManualLoader`] | answers requests from scripted handlers |
//! | [`TransportLoader`] | performs the request over a [`Transport`] |

mod dedup;
mod environment;
mod manual;
mod modify;
mod retry;
mod throttle;

pub use self::dedup::DeduplicatingLoader;
pub use self::environment::{EnvironmentLoader, EnvironmentOption, HttpRequestEnvironment};
pub use self::manual::ManualLoader;
pub use self::modify::ModifyingLoader;
pub use self::retry::RetryLoader;
pub use self::throttle::ThrottledLoader;

use crate::chain::{Loader, Next};
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::transport::{Transport, TransportAdapter};
use crate::HttpRequest;
use futures_util::future::BoxFuture;

/// The terminal stage: sends each request over a [`Transport`].
///
/// Never forwards.
#[derive(Clone)]
pub struct TransportLoader {
    adapter: TransportAdapter,
}

impl TransportLoader {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            adapter: TransportAdapter::new(transport),
        }
    }

    pub fn from_adapter(adapter: TransportAdapter) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &TransportAdapter {
        &self.adapter
    }
}

impl Loader for TransportLoader {
    fn load(&self, request: HttpRequest, token: RequestToken, _next: Next) -> BoxFuture<'_, HttpResult> {
        Box::pin(self.adapter.execute(request, token))
    }
}
