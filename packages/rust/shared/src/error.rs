//! Error types for ReportHarvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ReportHarvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error that escaped per-item classification.
    #[error("network error: {0}")]
    Network(String),

    /// The fetched payload could not be decoded as a spreadsheet.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Destination store error (listing, naming, encoding).
    #[error("storage error: {0}")]
    Storage(String),

    /// Archive container could not be created or finalized.
    #[error("archive error: {0}")]
    Archive(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad identifier, bad work list, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
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

    /// Whether retrying the same input can never change the result.
    ///
    /// Decode failures operate on bytes already fetched, and validation
    /// failures on the identifier itself.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("workers must be greater than zero");
        assert_eq!(
            err.to_string(),
            "config error: workers must be greater than zero"
        );

        let err = HarvestError::decode("unrecognized workbook format");
        assert!(err.to_string().contains("unrecognized workbook"));
    }

    #[test]
    fn permanence() {
        assert!(HarvestError::decode("bad bytes").is_permanent());
        assert!(HarvestError::validation("bad id").is_permanent());
        assert!(!HarvestError::Storage("disk full".into()).is_permanent());
        let io = std::io::Error::other("boom");
        assert!(!HarvestError::io("/tmp/x", io).is_permanent());
    }
}
