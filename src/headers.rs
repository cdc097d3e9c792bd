//! Ordered, multi-valued header and query collections.
//!
//! Both [`HttpHeaders`] and [`HttpQuery`] keep every `(key, value)` pair in the
//! order it was added. Distinct keys keep their insertion order, and values for
//! the same key keep theirs. Header names compare case-insensitively but keep
//! the spelling they were created with, so the wire sees what the caller wrote.

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A case-insensitive HTTP header name.
///
/// # Examples
///
/// ```
/// use loadchain::HeaderName;
///
/// assert_eq!(HeaderName::from("content-type"), HeaderName::CONTENT_TYPE);
/// assert_eq!(HeaderName::CONTENT_TYPE.as_str(), "Content-Type");
/// ```
#[derive(Debug, Clone)]
pub struct HeaderName(Cow<'static, str>);

impl HeaderName {
    /// Creates a header name from a static string without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Returns the name as it was originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub const ACCEPT: HeaderName = HeaderName::from_static("Accept");
    pub const ACCEPT_ENCODING: HeaderName = HeaderName::from_static("Accept-Encoding");
    pub const ACCEPT_LANGUAGE: HeaderName = HeaderName::from_static("Accept-Language");
    pub const AUTHORIZATION: HeaderName = HeaderName::from_static("Authorization");
    pub const CACHE_CONTROL: HeaderName = HeaderName::from_static("Cache-Control");
    pub const CONTENT_ENCODING: HeaderName = HeaderName::from_static("Content-Encoding");
    pub const CONTENT_LENGTH: HeaderName = HeaderName::from_static("Content-Length");
    pub const CONTENT_TYPE: HeaderName = HeaderName::from_static("Content-Type");
    pub const COOKIE: HeaderName = HeaderName::from_static("Cookie");
    pub const DATE: HeaderName = HeaderName::from_static("Date");
    pub const ETAG: HeaderName = HeaderName::from_static("ETag");
    pub const HOST: HeaderName = HeaderName::from_static("Host");
    pub const IF_MODIFIED_SINCE: HeaderName = HeaderName::from_static("If-Modified-Since");
    pub const IF_NONE_MATCH: HeaderName = HeaderName::from_static("If-None-Match");
    pub const LAST_MODIFIED: HeaderName = HeaderName::from_static("Last-Modified");
    pub const LOCATION: HeaderName = HeaderName::from_static("Location");
    pub const RETRY_AFTER: HeaderName = HeaderName::from_static("Retry-After");
    pub const SET_COOKIE: HeaderName = HeaderName::from_static("Set-Cookie");
    pub const USER_AGENT: HeaderName = HeaderName::from_static("User-Agent");
    pub const WWW_AUTHENTICATE: HeaderName = HeaderName::from_static("WWW-Authenticate");

    /// Number of retries a [`RetryLoader`](crate::loaders::RetryLoader) performed.
    pub const X_RETRY_COUNT: HeaderName = HeaderName::from_static("X-HTTP-Retry-Count");

    /// Id of the request whose result a deduplicated request shared.
    pub const X_ORIGINAL_REQUEST_ID: HeaderName =
        HeaderName::from_static("X-HTTP-Original-Request-ID");
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_usize(self.0.len());
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        Self(Cow::Owned(name.to_string()))
    }
}

impl From<String> for HeaderName {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&HeaderName> for HeaderName {
    fn from(name: &HeaderName) -> Self {
        name.clone()
    }
}

/// Ordered multi-map backing both headers and query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pairs<K> {
    entries: Vec<(K, String)>,
}

impl<K> Default for Pairs<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: PartialEq + Clone> Pairs<K> {
    fn get<Q>(&self, key: &Q) -> Vec<&str>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries
            .iter()
            .filter(|(k, _)| <K as Borrow<Q>>::borrow(k) == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn first<Q>(&self, key: &Q) -> Option<&str>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries
            .iter()
            .find(|(k, _)| <K as Borrow<Q>>::borrow(k) == key)
            .map(|(_, v)| v.as_str())
    }

    fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries.iter().any(|(k, _)| <K as Borrow<Q>>::borrow(k) == key)
    }

    fn add(&mut self, key: K, value: String) {
        self.entries.push((key, value));
    }

    /// Replaces the values for `key`, reusing its existing slots in order.
    ///
    /// Surplus old slots are dropped and surplus new values are appended.
    fn set_all(&mut self, key: K, values: Vec<String>) {
        let mut replacements = values.into_iter();
        let mut entries = Vec::with_capacity(self.entries.len());

        for (existing, value) in self.entries.drain(..) {
            if existing == key {
                if let Some(next) = replacements.next() {
                    entries.push((existing, next));
                }
            } else {
                entries.push((existing, value));
            }
        }

        entries.extend(replacements.map(|value| (key.clone(), value)));
        self.entries = entries;
    }

    fn iter(&self) -> impl Iterator<Item = (&K, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }
}

/// Ordered, multi-valued HTTP headers with case-insensitive names.
///
/// # Examples
///
/// ```
/// use loadchain::{HeaderName, HttpHeaders};
///
/// let mut headers = HttpHeaders::new();
/// headers.add("Accept", "text/html");
/// headers.add("accept", "application/json");
///
/// assert_eq!(headers.get(HeaderName::ACCEPT), vec!["text/html", "application/json"]);
///
/// headers.set(HeaderName::ACCEPT, Some("*/*"));
/// assert_eq!(headers.first(HeaderName::ACCEPT), Some("*/*"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    pairs: Pairs<HeaderName>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every value for `name`, in insertion order.
    pub fn get(&self, name: impl Into<HeaderName>) -> Vec<&str> {
        self.pairs.get(&name.into())
    }

    /// Returns the first value for `name`.
    pub fn first(&self, name: impl Into<HeaderName>) -> Option<&str> {
        self.pairs.first(&name.into())
    }

    pub fn contains(&self, name: impl Into<HeaderName>) -> bool {
        self.pairs.contains(&name.into())
    }

    /// Appends a value, keeping any existing values for the same name.
    pub fn add(&mut self, name: impl Into<HeaderName>, value: impl Into<String>) {
        self.pairs.add(name.into(), value.into());
    }

    /// Replaces every value for `name` with `value`, or removes the header on `None`.
    pub fn set(&mut self, name: impl Into<HeaderName>, value: Option<impl Into<String>>) {
        let values = value.map(Into::into).into_iter().collect();
        self.pairs.set_all(name.into(), values);
    }

    /// Replaces every value for `name`, leaving other headers untouched.
    pub fn set_all<I, V>(&mut self, name: impl Into<HeaderName>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.pairs.set_all(name.into(), values);
    }

    pub fn remove(&mut self, name: impl Into<HeaderName>) {
        self.pairs.set_all(name.into(), Vec::new());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for HttpHeaders
where
    N: Into<HeaderName>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HttpHeaders::new();
        headers.extend(iter);
        headers
    }
}

impl<N, V> Extend<(N, V)> for HttpHeaders
where
    N: Into<HeaderName>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.add(name, value);
        }
    }
}

/// Ordered, multi-valued query parameters with case-sensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpQuery {
    pairs: Pairs<String>,
}

impl HttpQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Vec<&str> {
        self.pairs.get(name)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.pairs.first(name)
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.add(name.into(), value.into());
    }

    pub fn set(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        let values = value.map(Into::into).into_iter().collect();
        self.pairs.set_all(name.into(), values);
    }

    pub fn set_all<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.pairs.set_all(name.into(), values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for HttpQuery
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut query = HttpQuery::new();
        for (name, value) in iter {
            query.add(name, value);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_compare_case_insensitively() {
        let a = HeaderName::from("x-request-id");
        let b = HeaderName::from("X-Request-ID");
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_eq!(b.as_str(), "X-Request-ID");
    }

    #[test]
    fn test_multi_value_round_trip() {
        let mut headers = HttpHeaders::new();
        headers.add("Other", "x");
        headers.add("K", "a");
        headers.add("K", "b");

        assert_eq!(headers.get("K"), vec!["a", "b"]);

        headers.set_all("k", ["c"]);
        assert_eq!(headers.get("K"), vec!["c"]);
        assert_eq!(headers.get("Other"), vec!["x"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_set_reuses_slots_and_appends_surplus() {
        let mut headers = HttpHeaders::new();
        headers.add("A", "1");
        headers.add("B", "2");
        headers.add("A", "3");

        headers.set_all("A", ["x", "y", "z"]);

        let pairs: Vec<_> = headers.iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert_eq!(pairs, vec![("A", "x"), ("B", "2"), ("A", "y"), ("A", "z")]);
    }

    #[test]
    fn test_set_none_removes_header() {
        let mut headers: HttpHeaders = [("Accept", "a"), ("Host", "h")].into_iter().collect();
        headers.set(HeaderName::ACCEPT, None::<String>);

        assert!(!headers.contains(HeaderName::ACCEPT));
        assert_eq!(headers.first(HeaderName::HOST), Some("h"));
    }

    #[test]
    fn test_query_keys_are_case_sensitive() {
        let mut query = HttpQuery::new();
        query.add("limit", "10");
        query.add("Limit", "20");

        assert_eq!(query.first("limit"), Some("10"));
        assert_eq!(query.get("Limit"), vec!["20"]);

        query.set("limit", Some("5"));
        let pairs: Vec<_> = query.iter().collect();
        assert_eq!(pairs, vec![("limit", "5"), ("Limit", "20")]);
    }
}
