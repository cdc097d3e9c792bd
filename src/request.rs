//! The request value submitted to a loader chain.

use crate::body::HttpBody;
use crate::headers::{HeaderName, HttpHeaders, HttpQuery};
use crate::options::{HttpOption, HttpOptions};
use http::Method;
use std::fmt;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Identity of a logical request.
///
/// Assigned once at construction and shared by every clone, so loaders can tell
/// a modified copy of a request apart from an entirely different request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// An HTTP request, described by its parts rather than by a URL.
///
/// The request stays mutable until it is submitted; every attempt sends a
/// snapshot of it. The URL scheme is not part of the request: it comes from
/// the [`SchemeOption`](crate::options::SchemeOption), `https` by default.
///
/// # Examples
///
/// ```
/// use loadchain::{HeaderName, HttpRequest};
/// use http::Method;
///
/// let request = HttpRequest::new()
///     .with_method(Method::POST)
///     .with_host("api.example.com")
///     .with_path("/users")
///     .with_query("limit", "10")
///     .with_header(HeaderName::ACCEPT, "application/json");
///
/// assert_eq!(request.host.as_deref(), Some("api.example.com"));
/// assert_eq!(request.query_value("limit"), Some("10"));
/// ```
#[derive(Clone)]
pub struct HttpRequest {
    id: RequestId,

    /// The HTTP method. Defaults to `GET`.
    pub method: Method,

    /// Host, optionally with a `:port` suffix.
    pub host: Option<String>,

    /// Absolute path. Must be empty or start with `/` by the time it is sent.
    pub path: Option<String>,

    pub fragment: Option<String>,

    pub query: HttpQuery,

    pub headers: HttpHeaders,

    pub body: Option<Arc<dyn HttpBody>>,

    /// Per-request feature configuration.
    pub options: HttpOptions,
}

impl HttpRequest {
    /// Creates an empty `GET` request with a fresh id.
    pub fn new() -> Self {
        Self {
            id: RequestId::new(),
            method: Method::GET,
            host: None,
            path: None,
            fragment: None,
            query: HttpQuery::new(),
            headers: HttpHeaders::new(),
            body: None,
            options: HttpOptions::new(),
        }
    }

    /// Creates a `GET` request for `path` on `host`.
    pub fn get(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new().with_host(host).with_path(path)
    }

    /// Creates a `POST` request for `path` on `host` carrying `body`.
    pub fn post(host: impl Into<String>, path: impl Into<String>, body: impl HttpBody + 'static) -> Self {
        Self::get(host, path).with_method(Method::POST).with_body(body)
    }

    /// Creates a request from an absolute URL.
    ///
    /// The scheme is dropped; see [`SchemeOption`](crate::options::SchemeOption).
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid absolute URL.
    pub fn from_url(method: Method, url: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(url)?;
        let mut request = Self::new().with_method(method);

        request.host = url.host_str().map(|host| match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        });
        request.path = Some(url.path().to_string());
        request.fragment = url.fragment().map(str::to_string);
        request.query = url.query_pairs().collect();

        Ok(request)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Appends a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.add(name, value);
        self
    }

    /// Appends a header value.
    pub fn with_header(mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl HttpBody + 'static) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    pub fn with_option<O: HttpOption>(mut self, value: O::Value) -> Self {
        self.options.set::<O>(value);
        self
    }

    /// Returns the first value of a header.
    pub fn header(&self, name: impl Into<HeaderName>) -> Option<&str> {
        self.headers.first(name)
    }

    /// Replaces every value of a header, or removes it on `None`.
    pub fn set_header(&mut self, name: impl Into<HeaderName>, value: Option<impl Into<String>>) {
        self.headers.set(name, value);
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.first(name)
    }

    pub fn set_query_value(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        self.query.set(name, value);
    }

    /// Reads an option, falling back to its default.
    pub fn option<O: HttpOption>(&self) -> O::Value {
        self.options.get::<O>()
    }

    pub fn set_option<O: HttpOption>(&mut self, value: O::Value) {
        self.options.set::<O>(value);
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut target = self.path.clone().unwrap_or_else(|| "/".to_string());
        if let Some(fragment) = &self.fragment {
            target.push('#');
            target.push_str(fragment);
        }
        let mut separator = '?';
        for (name, value) in self.query.iter() {
            target.push(separator);
            target.push_str(name);
            target.push('=');
            target.push_str(value);
            separator = '&';
        }

        write!(f, "{} {}", self.method, target)?;
        if let Some(host) = &self.host {
            write!(f, "\nHost: {}", host)?;
        }
        for (name, value) in self.headers.iter() {
            write!(f, "\n{}: {}", name, value)?;
        }
        if let Some(body) = &self.body {
            for (name, value) in body.headers().iter() {
                write!(f, "\n{}: {}", name, value)?;
            }
            f.write_str("\n\n")?;
            match body.bytes() {
                Ok(bytes) => write_body(f, &bytes)?,
                Err(_) => f.write_str("(omitted)")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("fragment", &self.fragment)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| ".."))
            .field("options", &self.options)
            .finish()
    }
}

/// Writes a body as UTF-8 text, or as upper-case hex when it is not text.
pub(crate) fn write_body(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    match std::str::from_utf8(bytes) {
        Ok(text) => f.write_str(text),
        Err(_) => bytes.iter().try_for_each(|byte| write!(f, "{:02X}", byte)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{DataBody, JsonBody};

    #[test]
    fn test_from_url_splits_components() {
        let request =
            HttpRequest::from_url(Method::GET, "https://example.test:8443/items?limit=10&tag=a#top")
                .unwrap();

        assert_eq!(request.host.as_deref(), Some("example.test:8443"));
        assert_eq!(request.path.as_deref(), Some("/items"));
        assert_eq!(request.fragment.as_deref(), Some("top"));
        assert_eq!(request.query_value("limit"), Some("10"));
        assert_eq!(request.query_value("tag"), Some("a"));
    }

    #[test]
    fn test_post_helper_carries_body() {
        let request = HttpRequest::post("example.test", "/notes", DataBody::from("note"));

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.host.as_deref(), Some("example.test"));
        assert_eq!(request.body.as_ref().unwrap().bytes().unwrap().as_ref(), b"note");
    }

    #[test]
    fn test_clone_keeps_id() {
        let request = HttpRequest::new();
        let copy = request.clone().with_path("/changed");
        assert_eq!(request.id(), copy.id());
        assert_ne!(request.id(), HttpRequest::new().id());
    }

    #[test]
    fn test_display_includes_body_headers_and_text() {
        let request = HttpRequest::new()
            .with_method(Method::POST)
            .with_host("example.test")
            .with_path("/items")
            .with_query("a", "1")
            .with_body(JsonBody::new(serde_json::json!({ "n": 1 })));

        let text = request.to_string();
        assert!(text.starts_with("POST /items?a=1\nHost: example.test"));
        assert!(text.contains("Content-Type: application/json; charset=utf-8"));
        assert!(text.ends_with(r#"{"n":1}"#));
    }
}
