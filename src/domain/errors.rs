//! Domain errors for the swarmgate governance core.

use thiserror::Error;

use super::models::QueueClass;

/// Errors that abort initialization or signal a broken domain invariant.
///
/// Runtime outcomes (validation rejections, admission rejections, strategy
/// failures, timeouts) are *not* errors in this sense; they travel as their
/// own enums and structured results.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid limits for queue '{queue}': {reason}")]
    InvalidLimits { queue: QueueClass, reason: String },

    #[error("Routine step dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Routine step '{step}' depends on unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
