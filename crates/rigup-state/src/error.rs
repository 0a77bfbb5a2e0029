//! Error types for rigup-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No session stored under this id
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// History is append-only; an id may only be written once
    #[error("History record already exists: {id}")]
    DuplicateRecord { id: String },

    /// A stored file could not be decoded
    #[error("Corrupt record in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Filesystem error
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_display() {
        let err = StorageError::SessionNotFound {
            session_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: abc");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StorageError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
