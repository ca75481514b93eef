//! Blocking HTTP access to the image service.
//!
//! - [`HttpClient`] is the transport seam; [`ReqwestClient`] is the real
//!   implementation holding one persistent connection pool.
//! - [`RetryingClient`] wraps a transport with the bounded retry and backoff
//!   policy described by [`RetryPolicy`], and owns the pool lifetime.

mod client;
mod retry;

pub use client::{HttpClient, ReqwestClient};
pub use retry::{RetryPolicy, RetryingClient, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES};

#[cfg(test)]
pub(crate) use client::tests::MockHttpClient;

use bytes::Bytes;

/// Maximum number of body bytes kept in error messages.
const ERROR_BODY_EXCERPT: usize = 256;

/// HTTP method used by the service protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a POST request with a body.
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a 200 response.
    pub fn ok(content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// Create a response with the given status and body.
    pub fn with_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short, lossy excerpt of the body for diagnostics.
    pub fn body_excerpt(&self) -> String {
        let end = self.body.len().min(ERROR_BODY_EXCERPT);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}
