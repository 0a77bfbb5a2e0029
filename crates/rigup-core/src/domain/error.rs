//! Domain-level error taxonomy for rigup.

/// Malformed input, rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("installation must select at least one component")]
    EmptyComponents,

    #[error("installation must include the core component")]
    MissingCore,

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("unknown check: {0}")]
    UnknownCheck(String),

    #[error("{field} must not be negative (got {value})")]
    Negative { field: String, value: i64 },

    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Rigup domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RigupError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("illegal pipeline transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rigup_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for rigup domain operations.
pub type Result<T> = std::result::Result<T, RigupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::MissingCore.to_string(),
            "installation must include the core component"
        );
        let err = ValidationError::Negative {
            field: "retention_days".to_string(),
            value: -3,
        };
        assert!(err.to_string().contains("retention_days"));
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_validation_converts_into_rigup_error() {
        let err: RigupError = ValidationError::EmptyComponents.into();
        assert!(err.to_string().starts_with("validation error"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = RigupError::InvalidTransition {
            from: "completed".to_string(),
            to: "installing".to_string(),
        };
        assert!(err.to_string().contains("completed"));
        assert!(err.to_string().contains("installing"));
    }
}
