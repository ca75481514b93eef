//! HTTP client abstraction for testability

use std::time::Duration;

use parking_lot::RwLock;

use super::{HttpRequest, HttpResponse, Method};
use crate::error::TransportError;

/// Trait for HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP request.
    ///
    /// Any received response is returned, whatever its status. Only failures
    /// that produced no status at all are errors.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Tears down persistent connections.
    ///
    /// Requests issued afterwards fail with [`TransportError::Closed`].
    fn shutdown(&self) {}
}

/// Real HTTP client implementation using reqwest.
///
/// One instance holds one connection pool; connections are reused across
/// requests until [`HttpClient::shutdown`] drops the pool.
pub struct ReqwestClient {
    client: RwLock<Option<reqwest::blocking::Client>>,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with the given request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rasterlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        // Clone is cheap; the pool is shared behind an Arc
        let client = self.client.read().clone().ok_or(TransportError::Closed)?;

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|e| TransportError::Network {
            url: request.url.clone(),
            reason: format!("Request failed: {}", e),
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().map_err(|e| TransportError::Network {
            url: request.url.clone(),
            reason: format!("Failed to read response: {}", e),
        })?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    fn shutdown(&self) {
        self.client.write().take();
    }
}
