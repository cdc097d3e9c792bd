//! A full loader pipeline against JSONPlaceholder.
//!
//! This example shows how to:
//! - Fill in host and path prefix with an environment
//! - Retry failed loads with exponential backoff
//! - Share identical concurrent loads
//! - Cap the number of concurrent requests
//!
//! Run with: `cargo run --example pipeline`

use loadchain::loaders::{
    DeduplicatingLoader, EnvironmentLoader, HttpRequestEnvironment, RetryLoader, ThrottledLoader,
};
use loadchain::options::DeduplicationIdentifier;
use loadchain::retry::BackoffRetry;
use loadchain::transport::ReqwestTransport;
use loadchain::{Client, HeaderName, HttpRequest};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("loadchain=debug,pipeline=info")
        .init();

    let client = Client::builder()
        .loader(EnvironmentLoader::new(
            HttpRequestEnvironment::new()
                .host("jsonplaceholder.typicode.com")
                .header("Accept", "application/json"),
        ))
        .loader(RetryLoader::new())
        .loader(DeduplicatingLoader::new())
        .loader(ThrottledLoader::new(2))
        .transport(ReqwestTransport::new()?)
        .build();

    println!("=== Single Request ===");
    let request = HttpRequest::new()
        .with_path("posts/1")
        .with_retry_strategy(BackoffRetry::exponential(3).with_jitter());
    let response = client.load(request).await?;
    let post: Post = response.json()?;

    println!("Status: {}", response.status);
    println!("Title: {}", post.title);
    println!("Retries: {:?}", response.header(HeaderName::X_RETRY_COUNT));
    println!();

    println!("=== Deduplicated Requests ===");
    let request = || {
        HttpRequest::new()
            .with_path("posts/2")
            .with_option::<DeduplicationIdentifier>(Some("posts/2".to_string()))
    };
    let (first, second) = tokio::join!(client.load(request()), client.load(request()));
    let (first, second) = (first?, second?);

    println!("First status: {}", first.status);
    println!(
        "Second shared the load of: {:?}",
        second.header(HeaderName::X_ORIGINAL_REQUEST_ID)
    );

    Ok(())
}
