//! Error types for the courier-spool crate.
//!
//! Every repository operation returns [`PersistenceError`], which separates
//! missing records (often harmless, see [`PersistenceError::is_not_found`])
//! from genuine storage failures.

use std::io;

use courier_common::MailId;
use thiserror::Error;

/// Top-level repository error type.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// No record stored under this id.
    #[error("Mail not found: {0}")]
    NotFound(MailId),

    /// Repository directory validation failed.
    #[error("Repository validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A bounded backend is full.
    #[error("Repository capacity exceeded: {len}/{capacity} mails")]
    CapacityExceeded { len: usize, capacity: usize },

    /// The backend cannot currently serve requests.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// No repository is configured under this name.
    #[error("Unknown repository '{0}'")]
    UnknownRepository(String),
}

impl PersistenceError {
    /// Whether the error only reports a missing record
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Repository directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Path contains a `..` component.
    #[error("Repository path cannot contain '..' components: {0}")]
    ParentComponent(String),

    /// Path is relative.
    #[error("Repository path must be absolute: {0}")]
    NotAbsolute(String),

    /// Path points into a system directory.
    #[error("Repository path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    /// Path exists but is not a directory.
    #[error("Repository path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for repository operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = PersistenceError::from(io_err);

        assert!(matches!(err, PersistenceError::Io(_)));
        assert!(err.to_string().contains("access denied"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        let err = PersistenceError::NotFound(MailId::new());
        assert!(err.is_not_found());
    }
}
