//! Inbound request descriptor.
//!
//! The hosting framework parses the wire and hands the middleware chain a
//! [`Request`] built through the fluent constructor API here. Key functions
//! read whatever request attributes they need (method, path, query, headers,
//! body) to derive a cache key.

use std::collections::HashMap;

use bytes::Bytes;

use super::{Headers, Method};

/// An inbound HTTP request as seen by the middleware chain.
///
/// # Examples
///
/// ```
/// use rescache::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/search")
///     .query("q=rust&page=2")
///     .header("Accept", "application/json");
///
/// assert_eq!(request.path(), "/search");
/// assert_eq!(request.query_param("q"), Some("rust"));
/// assert_eq!(request.headers().get("accept"), Some("application/json"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    /// Creates a request with the given method and path and no query,
    /// headers, or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: Headers::new(),
            body: Bytes::new(),
            params: HashMap::new(),
        }
    }

    /// Sets the raw query string (without the leading `?`) and parses it
    /// into key/value parameters.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.params = parse_query_string(&query);
        self.query = Some(query);
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// `+` is decoded as a space; full percent-decoding is left to the hosting
/// framework, which owns wire-level concerns.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}
