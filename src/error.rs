//! Error types for catalog-harvest
//!
//! The pipeline distinguishes four failure families, each with its own blast radius:
//! - [`FetchError`]: one page attempt failed; retried, then escalated to a page failure
//! - [`MalformedPageError`]: the payload's `products` field has an unexpected shape
//! - [`DatabaseError`] / [`sqlx::Error`]: a batch transaction failed; logged, batch lost
//! - [`NotifyError`]: a status message was not delivered; logged and swallowed
//!
//! Only construction-time failures (bad configuration, unreachable database) surface
//! as an [`Error`] from the top-level run.

use crate::types::PageNumber;
use thiserror::Error;

/// Result type alias for catalog-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pages.start")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Page fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Notification delivery failed
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),

    /// The fetch pool's supervisor task panicked or was aborted
    #[error("fetch pool failed: {0}")]
    Pool(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside a page fetch (e.g. building the HTTP client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Batch transaction failed and was rolled back
    #[error("transaction for batch of {size} records failed: {reason}")]
    TransactionFailed {
        /// Number of records in the rolled-back batch
        size: usize,
        /// The underlying failure
        reason: String,
    },
}

/// The `products` field of a page payload is present but is not an array
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page payload has `products` of type {found}, expected an array")]
pub struct MalformedPageError {
    /// JSON kind found at `products` ("number", "string", "bool" or "object")
    pub found: &'static str,
}

/// A single page fetch attempt failed
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body read failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The catalog API answered with a non-2xx status
    #[error("page {page} returned HTTP {status}")]
    Status {
        /// The requested page
        page: PageNumber,
        /// HTTP status code
        status: u16,
    },

    /// The body was not valid JSON
    #[error("page {page} body is not valid JSON: {source}")]
    Decode {
        /// The requested page
        page: PageNumber,
        /// The JSON decoder error
        source: serde_json::Error,
    },

    /// The JSON body had an unexpected shape
    #[error(transparent)]
    MalformedPage(#[from] MalformedPageError),
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Request could not be sent
    #[error("failed to send notification: {0}")]
    Transport(#[from] reqwest::Error),

    /// The chat-bot endpoint rejected the message
    #[error("notification rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// No response within the configured timeout
    #[error("notification timed out after {0:?}")]
    Timeout(std::time::Duration),
}
