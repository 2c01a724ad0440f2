//! HTTP response builder.
//!
//! Middleware and handlers construct a [`Response`] through the fluent
//! builder API; the hosting framework serializes it onto the wire. The body
//! is exposed as raw bytes so middleware that persists or inspects it sees
//! exactly what will be emitted.

use serde::Serialize;

use super::{Headers, StatusCode};

/// An HTTP response produced by a handler or middleware.
///
/// # Examples
///
/// ```
/// use rescache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.body_bytes(), br#"{"status":"ok"}"#);
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Creates a `200 OK` response with a JSON-serialized body and a
    /// `Content-Type: application/json` header.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if `value` cannot be
    /// serialized.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(body))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware that receives a
    /// `Response` from downstream and decorates it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string or raw bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body bytes.
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
