//! Error types for raster access sessions.
//!
//! Errors fall into two groups:
//!
//! - **Session-fatal** (`Config`, `Auth`, `Metadata`): raised while opening a
//!   session. No session object is produced.
//! - **Read-fatal** (`Transport`, `Protocol`, `InvalidRead`,
//!   `BudgetExceeded`): raised by a single read. The session and every block
//!   already in the cache stay valid, and the caller may retry the read.

use thiserror::Error;

/// Result type for raster access operations.
pub type RasterResult<T> = Result<T, RasterError>;

/// Failures of the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request never produced an HTTP status (DNS, TLS, timeout, ...).
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// The server answered with a non-success status that is not retried.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The server kept answering with a retryable status.
    #[error("HTTP {status} from {url} after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// The connection pool was torn down by `close()`.
    #[error("connection pool closed")]
    Closed,
}

/// Errors that can occur while opening a session or reading from it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RasterError {
    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Token exchange failed or credentials are inconsistent.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Image metadata is missing, malformed or unsupported.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// HTTP transport failure for a single fetch.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or mismatching tile response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The read addresses pixels or bands the raster does not have.
    #[error("invalid read: {0}")]
    InvalidRead(String),

    /// A single block for a single band does not fit the byte budget.
    #[error("request of {required} bytes exceeds byte budget of {budget} bytes")]
    BudgetExceeded { required: u64, budget: u64 },
}

impl RasterError {
    /// True for errors that prevent a session from being opened.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            RasterError::Config(_) | RasterError::Auth(_) | RasterError::Metadata(_)
        )
    }

    /// True for errors that only fail the read that raised them.
    pub fn is_retryable_read(&self) -> bool {
        !self.is_fatal_to_session()
    }
}
