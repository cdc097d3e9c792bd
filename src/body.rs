//! Request and response bodies.
//!
//! A body supplies its bytes and the headers it contributes (typically
//! `Content-Type`). Bodies are held behind an `Arc` and can be asked for their
//! bytes again on every attempt, so retries and redirects resend the same
//! content. Streaming bodies are not supported.

use crate::error::BodyError;
use crate::headers::{HeaderName, HttpHeaders};
use bytes::Bytes;
use serde::Serialize;

/// Something that can be sent as a request body.
pub trait HttpBody: Send + Sync {
    /// Headers this body contributes to the request.
    fn headers(&self) -> HttpHeaders {
        HttpHeaders::new()
    }

    /// Produces the body bytes. May be called once per attempt.
    fn bytes(&self) -> Result<Bytes, BodyError>;
}

/// A body of raw bytes.
///
/// # Examples
///
/// ```
/// use loadchain::body::{DataBody, HttpBody};
///
/// let body = DataBody::new("hello").with_header("Content-Type", "text/plain");
/// assert_eq!(body.bytes().unwrap().as_ref(), b"hello");
/// assert_eq!(body.headers().first("content-type"), Some("text/plain"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DataBody {
    data: Bytes,
    headers: HttpHeaders,
}

impl DataBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            headers: HttpHeaders::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }
}

impl From<Bytes> for DataBody {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for DataBody {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static str> for DataBody {
    fn from(data: &'static str) -> Self {
        Self::new(data)
    }
}

impl From<String> for DataBody {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl HttpBody for DataBody {
    fn headers(&self) -> HttpHeaders {
        self.headers.clone()
    }

    fn bytes(&self) -> Result<Bytes, BodyError> {
        Ok(self.data.clone())
    }
}

/// An `application/x-www-form-urlencoded` body.
///
/// Pairs are encoded in the order they were given.
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    values: Vec<(String, String)>,
}

impl FormBody {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }
}

impl HttpBody for FormBody {
    fn headers(&self) -> HttpHeaders {
        let mut headers = HttpHeaders::new();
        headers.add(
            HeaderName::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=utf-8",
        );
        headers
    }

    fn bytes(&self) -> Result<Bytes, BodyError> {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.values.iter())
            .finish();
        Ok(Bytes::from(encoded))
    }
}

/// A JSON body, encoded with `serde_json` on every attempt.
#[derive(Debug, Clone)]
pub struct JsonBody<T> {
    value: T,
}

impl<T> JsonBody<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Serialize + Send + Sync> HttpBody for JsonBody<T> {
    fn headers(&self) -> HttpHeaders {
        let mut headers = HttpHeaders::new();
        headers.add(HeaderName::CONTENT_TYPE, "application/json; charset=utf-8");
        headers
    }

    fn bytes(&self) -> Result<Bytes, BodyError> {
        Ok(Bytes::from(serde_json::to_vec(&self.value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_form_body_encodes_in_order() {
        let body = FormBody::new([("name", "Ada Lovelace"), ("lang", "en&fr")]);
        assert_eq!(
            body.bytes().unwrap().as_ref(),
            b"name=Ada+Lovelace&lang=en%26fr"
        );
        assert_eq!(
            body.headers().first(HeaderName::CONTENT_TYPE),
            Some("application/x-www-form-urlencoded; charset=utf-8")
        );
    }

    #[test]
    fn test_json_body_encodes_value() {
        let body = JsonBody::new(serde_json::json!({ "n": 1 }));
        assert_eq!(body.bytes().unwrap().as_ref(), br#"{"n":1}"#);
        assert_eq!(
            body.headers().first(HeaderName::CONTENT_TYPE),
            Some("application/json; charset=utf-8")
        );
    }

    #[test]
    fn test_json_body_encoding_failure_is_an_error() {
        // JSON object keys must be strings.
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "value");

        let body = JsonBody::new(map);
        assert!(matches!(body.bytes(), Err(BodyError::Json(_))));
    }

    #[test]
    fn test_body_bytes_can_be_replayed() {
        let body = DataBody::new(vec![1u8, 2, 3]);
        assert_eq!(body.bytes().unwrap(), body.bytes().unwrap());
    }
}
