//! Unified error types for the Stowage workspace.
//!
//! Every failure of the import core surfaces synchronously as one of these
//! variants. Nothing is retried automatically; callers consult
//! [`StowageError::is_retryable`] when they want to decide for themselves.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StowageError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The image archive is malformed or lacks required metadata.
    #[error("corrupt image archive {path}: {reason}")]
    CorruptArchive {
        /// Archive that failed to parse.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A container could not be launched from a stored image.
    #[error("failed to launch {reference}: {reason}")]
    Launch {
        /// Reference the launch was requested for.
        reference: String,
        /// Why the launch failed.
        reason: String,
    },

    /// An image name does not follow the reference grammar.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// The rejected input.
        reference: String,
        /// Which rule it broke.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StowageError {
    /// Builds an [`StowageError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`StowageError::CorruptArchive`] for `path`.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`StowageError::Launch`] for `reference`.
    pub fn launch(reference: impl ToString, reason: impl Into<String>) -> Self {
        Self::Launch {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Only filesystem failures qualify. A corrupt archive stays corrupt and
    /// a launch failure is reported as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StowageError>;
