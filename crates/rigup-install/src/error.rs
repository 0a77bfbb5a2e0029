//! Errors surfaced by the installation service.

use rigup_core::{RigupError, ValidationError};
use rigup_state::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed request, rejected before any side effect
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("session not found: {0}")]
    NotFound(String),

    /// The session is in a state that does not allow the request
    #[error("{0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Storage(_) | ServiceError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SessionNotFound { session_id } => ServiceError::NotFound(session_id),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<RigupError> for ServiceError {
    fn from(err: RigupError) -> Self {
        match err {
            RigupError::Validation(e) => ServiceError::Validation(e),
            RigupError::SessionNotFound(id) => ServiceError::NotFound(id),
            RigupError::Storage(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::from(ValidationError::MissingCore).status_code(), 400);
        assert_eq!(ServiceError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(ServiceError::Conflict("busy".to_string()).status_code(), 409);
        assert_eq!(ServiceError::Internal("boom".to_string()).status_code(), 500);
    }

    #[test]
    fn test_storage_not_found_maps_to_404() {
        let err: ServiceError = StorageError::SessionNotFound {
            session_id: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::NotFound(ref id) if id == "abc"));
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = ServiceError::from(ValidationError::EmptyComponents);
        assert_eq!(err.to_string(), "installation must select at least one component");
    }
}
