//! Error types for protocolsio.
//!
//! Library crates use [`ProtocolsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all protocolsio operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// No API credential was available for an authenticated request.
    #[error("no authentication token configured (set {env_var} or [auth].token)")]
    Unauthenticated { env_var: String },

    /// Network/TLS failure while talking to a remote endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server kept answering HTTP 429 until the backoff ceiling was reached.
    #[error("rate limit saturated for {url}: gave up after backing off for {waited:?}")]
    RateLimited { url: String, waited: Duration },

    /// Any non-2xx status other than 429.
    #[error("unexpected HTTP status {status} from {url}")]
    Http { url: String, status: u16 },

    /// Malformed JSON or a pagination block without a usable cursor.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// HTTP 200 with a non-zero embedded `status_code`.
    #[error("unexpected status_code {status_code} from {url}")]
    Application { url: String, status_code: i64 },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// One or more items of a page could not be persisted.
    #[error("page {page}: {} item(s) failed: {}", .errors.len(), join_errors(.errors))]
    PageFailed {
        page: u64,
        errors: Vec<ProtocolsError>,
    },

    /// The bulk index sink rejected a request.
    #[error("index sink error: {0}")]
    Sink(String),

    /// Data validation error (bad flag value, invalid page range, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A background pipeline task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    /// The run was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ProtocolsError>;

impl ProtocolsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a decode error from any displayable message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_errors(errors: &[ProtocolsError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
