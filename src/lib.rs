//! # loadchain - a composable HTTP loading pipeline
//!
//! loadchain sends HTTP requests through a chain of *loaders*: small stages that
//! may retry, deduplicate, throttle or rewrite a request before it reaches the
//! transport that actually talks to the network. Every request resolves to
//! exactly one [`HttpResult`], and can be cancelled cooperatively at any stage
//! through its [`RequestToken`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use loadchain::loaders::{RetryLoader, ThrottledLoader};
//! use loadchain::retry::BackoffRetry;
//! use loadchain::transport::ReqwestTransport;
//! use loadchain::{Client, HttpRequest};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .loader(RetryLoader::new())
//!         .loader(ThrottledLoader::new(4))
//!         .transport(ReqwestTransport::new()?)
//!         .build();
//!
//!     let request = HttpRequest::new()
//!         .with_host("api.example.com")
//!         .with_path("/users/123")
//!         .with_retry_strategy(BackoffRetry::exponential(3));
//!
//!     let response = client.load(request).await?;
//!     let user: User = response.json()?;
//!     println!("{} ({})", user.name, user.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Loader chain** - Compose stages with [`ClientBuilder`] or wire them by hand with [`chain::LoaderChain`]
//! - **Per-request options** - Retry strategy, deduplication, throttling, redirect and auth handlers live in a type-indexed [`options::HttpOptions`] bag
//! - **Cooperative cancellation** - One [`RequestToken`] reaches whichever attempt is in flight
//! - **Rich errors** - An [`ErrorCode`] plus the request, any partial response and the underlying error
//! - **Structured logging** - Diagnostics through `tracing`
//!
//! ## Error Handling
//!
//! A non-2xx status is still a successful load. Failures are reserved for
//! requests that produced no usable response:
//!
//! ```no_run
//! use loadchain::{Client, ErrorCode, HttpRequest};
//!
//! # async fn example(client: Client) {
//! let request = HttpRequest::new().with_host("api.example.com").with_path("/feed");
//! match client.load(request).await {
//!     Ok(response) if response.status.is_success() => println!("{:?}", response.text()),
//!     Ok(response) => eprintln!("Server said {}", response.status),
//!     Err(error) if error.code() == ErrorCode::Cancelled => {}
//!     Err(error) => eprintln!("{}", error.report()),
//! }
//! # }
//! ```
//!
//! ## Writing a Loader
//!
//! Loaders receive an explicit [`chain::Next`] to forward through:
//!
//! ```
//! use futures_util::future::BoxFuture;
//! use loadchain::chain::{Loader, Next};
//! use loadchain::{HttpRequest, HttpResult, RequestToken};
//!
//! struct ApiKey(String);
//!
//! impl Loader for ApiKey {
//!     fn load(&self, request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
//!         Box::pin(async move {
//!             let request = request.with_query("api_key", self.0.clone());
//!             next.load(request, token).await
//!         })
//!     }
//! }
//! ```

pub mod auth;
pub mod body;
pub mod chain;
mod client;
mod error;
mod headers;
pub mod loaders;
pub mod options;
pub mod redirect;
mod request;
mod response;
pub mod retry;
mod token;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use error::{BodyError, ErrorCode, HttpError, Result, TransportError, TransportErrorKind};
pub use headers::{HeaderName, HttpHeaders, HttpQuery};
pub use request::{HttpRequest, RequestId};
pub use response::{failure, internal_server_error, ok, HttpResponse, HttpResult, HttpResultExt};
pub use token::RequestToken;
