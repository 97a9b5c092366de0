//! Error types for sitecorpus.
//!
//! Library crates use [`SiteCorpusError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all sitecorpus operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteCorpusError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A required credential is not available.
    #[error("missing credentials: {0}")]
    Credentials(String),

    /// Network/HTTP error outside the typed fetch and remote paths.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Local Content Store or Audit Log error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote index failure that ends the run.
    #[error("remote index error: {0}")]
    Remote(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, invalid record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteCorpusError>;

impl SiteCorpusError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SiteCorpusError::config("batch_size must be positive");
        assert_eq!(err.to_string(), "config error: batch_size must be positive");

        let err = SiteCorpusError::Credentials("GROUNDX_API_KEY is not set".into());
        assert!(err.to_string().starts_with("missing credentials"));

        let err = SiteCorpusError::io(
            "/tmp/audit.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("audit.jsonl"));
    }
}
