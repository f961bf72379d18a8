//! Error types for kanjigen.
//!
//! Library crates use [`KanjigenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kanjigen operations.
#[derive(Debug, thiserror::Error)]
pub enum KanjigenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The durable job store exists but does not have a valid store shape.
    #[error("corrupt job store at {path:?}: {message}")]
    CorruptStore { path: PathBuf, message: String },

    /// The identity/group seed document could not be interpreted.
    #[error("invalid seed at {path:?}: {message}")]
    Seed { path: PathBuf, message: String },

    /// A commit or lookup referenced an id that is not in the store.
    #[error("unknown work item: {0}")]
    UnknownItem(String),

    /// The generation backend cannot be launched at all (fatal to a run).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error outside of store loading.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data validation error (record shape, identity mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KanjigenError>;

impl KanjigenError {
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

    /// Create a corrupt-store error for the store at `path`.
    pub fn corrupt_store(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a seed error for the document at `path`.
    pub fn seed(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Seed {
            path: path.into(),
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

impl From<serde_json::Error> for KanjigenError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KanjigenError::config("missing seed");
        assert_eq!(err.to_string(), "config error: missing seed");

        let err = KanjigenError::corrupt_store("db.json", "expected `meta`");
        assert!(err.to_string().contains("corrupt job store"));
        assert!(err.to_string().contains("expected `meta`"));

        let err = KanjigenError::UnknownItem("日".into());
        assert_eq!(err.to_string(), "unknown work item: 日");
    }
}
