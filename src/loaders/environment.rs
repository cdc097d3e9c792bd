use crate::chain::{Loader, Next};
use crate::headers::{HeaderName, HttpHeaders, HttpQuery};
use crate::options::HttpOption;
use crate::response::HttpResult;
use crate::token::RequestToken;
use crate::HttpRequest;
use futures_util::future::BoxFuture;
use http::Method;

/// Defaults filled into requests by an [`EnvironmentLoader`].
///
/// # Examples
///
/// ```
/// use loadchain::loaders::HttpRequestEnvironment;
///
/// let staging = HttpRequestEnvironment::new()
///     .host("staging.example.com")
///     .path_prefix("api/v2")
///     .header("X-Client", "inventory-sync");
///
/// assert_eq!(staging.path_prefix, "/api/v2");
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequestEnvironment {
    /// Overrides the method of every request.
    pub method: Option<Method>,
    /// Used for requests without a host.
    pub host: Option<String>,
    /// Prepended to relative paths. Always starts with `/`.
    pub path_prefix: String,
    /// Appended to every request's query.
    pub query: HttpQuery,
    /// Appended to every request's headers.
    pub headers: HttpHeaders,
}

impl HttpRequestEnvironment {
    pub fn new() -> Self {
        Self {
            method: None,
            host: None,
            path_prefix: "/".to_string(),
            query: HttpQuery::new(),
            headers: HttpHeaders::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the path prefix, adding a leading `/` if it is missing.
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.path_prefix = if prefix.starts_with('/') {
            prefix
        } else {
            format!("/{}", prefix)
        };
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.add(name, value);
        self
    }

    pub fn header(mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Fills this environment into `request`.
    ///
    /// Absolute paths are kept as they are; empty paths become the prefix and
    /// relative paths are appended to it.
    pub fn apply(&self, request: &mut HttpRequest) {
        if let Some(method) = &self.method {
            request.method = method.clone();
        }

        if request.host.is_none() {
            request.host = self.host.clone();
        }

        let path = request.path.as_deref().unwrap_or("");
        if path.is_empty() {
            request.path = Some(self.path_prefix.clone());
        } else if !path.starts_with('/') {
            let separator = if self.path_prefix.ends_with('/') { "" } else { "/" };
            request.path = Some(format!("{}{}{}", self.path_prefix, separator, path));
        }

        for (name, value) in self.query.iter() {
            request.query.add(name, value);
        }
        for (name, value) in self.headers.iter() {
            request.headers.add(name, value);
        }
    }
}

impl Default for HttpRequestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-request environment, taking precedence over the loader's own.
pub enum EnvironmentOption {}

impl HttpOption for EnvironmentOption {
    type Value = Option<HttpRequestEnvironment>;

    fn default_value() -> Self::Value {
        None
    }
}

/// Fills an [`HttpRequestEnvironment`] into every request before forwarding it.
#[derive(Debug, Clone)]
pub struct EnvironmentLoader {
    environment: HttpRequestEnvironment,
}

impl EnvironmentLoader {
    pub fn new(environment: HttpRequestEnvironment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &HttpRequestEnvironment {
        &self.environment
    }
}

impl Loader for EnvironmentLoader {
    fn load(&self, mut request: HttpRequest, token: RequestToken, next: Next) -> BoxFuture<'_, HttpResult> {
        match request.option::<EnvironmentOption>() {
            Some(environment) => environment.apply(&mut request),
            None => self.environment.apply(&mut request),
        }
        Box::pin(async move { next.load(request, token).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> HttpRequestEnvironment {
        HttpRequestEnvironment::new()
            .host("api.example.com")
            .path_prefix("v1")
            .query("key", "abc")
            .header("X-Client", "tests")
    }

    #[test]
    fn test_fills_missing_parts() {
        let mut request = HttpRequest::new().with_path("users");
        env().apply(&mut request);

        assert_eq!(request.host.as_deref(), Some("api.example.com"));
        assert_eq!(request.path.as_deref(), Some("/v1/users"));
        assert_eq!(request.query_value("key"), Some("abc"));
        assert_eq!(request.header("x-client"), Some("tests"));
    }

    #[test]
    fn test_keeps_explicit_host_and_absolute_path() {
        let mut request = HttpRequest::new().with_host("other.test").with_path("/status");
        env().apply(&mut request);

        assert_eq!(request.host.as_deref(), Some("other.test"));
        assert_eq!(request.path.as_deref(), Some("/status"));
    }

    #[test]
    fn test_empty_path_becomes_prefix() {
        let mut request = HttpRequest::new();
        env().apply(&mut request);
        assert_eq!(request.path.as_deref(), Some("/v1"));
    }

    #[test]
    fn test_method_override() {
        let mut request = HttpRequest::new();
        HttpRequestEnvironment::new().method(Method::HEAD).apply(&mut request);
        assert_eq!(request.method, Method::HEAD);
    }

    #[tokio::test]
    async fn test_request_environment_wins() {
        let loader = EnvironmentLoader::new(env());
        let manual = crate::loaders::ManualLoader::new();
        manual.then(|request, _| async move { Ok(crate::HttpResponse::ok(request)) });

        let chain = crate::chain::LoaderChain::new();
        let head = chain.register(loader);
        let tail = chain.register(manual);
        chain.link(&[head, tail]);

        let request = HttpRequest::new().with_option::<EnvironmentOption>(Some(
            HttpRequestEnvironment::new().host("override.test"),
        ));
        let response = chain.load(head, request, RequestToken::new()).await.unwrap();
        assert_eq!(response.request.host.as_deref(), Some("override.test"));
        assert_eq!(response.request.query_value("key"), None);
    }
}
