//! Error types for lexcrawl.
//!
//! Library crates use [`LexCrawlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all lexcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum LexCrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unrecoverable error before any fetching starts (storage unreachable,
    /// invalid sources, ...).
    #[error("startup error: {0}")]
    Startup(String),

    /// Retryable network failure (timeout, connection reset, 5xx).
    #[error("transient fetch error for {url}: {message}")]
    TransientFetch { url: String, message: String },

    /// Non-retryable fetch failure (4xx, malformed or disallowed URL).
    #[error("permanent fetch error for {url}: {message}")]
    PermanentFetch { url: String, message: String },

    /// The source answered 429; the whole pool should back off.
    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// Markup could not be turned into a document.
    #[error("extraction error for {url}: {message}")]
    Extraction { url: String, message: String },

    /// The language toolkit failed.
    #[error("normalization error: {0}")]
    Normalization(String),

    /// Database or storage layer error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad seed file, unknown enum value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before the operation finished.
    #[error("run cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LexCrawlError>;

impl LexCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a persistence error from any displayable error.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn transient(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientFetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    pub fn permanent(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PermanentFetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    pub fn extraction(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
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

    /// Whether the fetcher may try the same target again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. } | Self::RateLimited { .. })
    }

    /// Short, stable label stored in the `target_errors` log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Startup(_) => "startup",
            Self::TransientFetch { .. } => "transient_fetch",
            Self::PermanentFetch { .. } => "permanent_fetch",
            Self::RateLimited { .. } => "rate_limited",
            Self::Extraction { .. } => "extraction",
            Self::Normalization(_) => "normalization",
            Self::Persistence(_) => "persistence",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
            Self::Cancelled => "cancelled",
        }
    }
}
