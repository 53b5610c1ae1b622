use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid event timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Publish error: {0}")]
    PublishError(#[source] anyhow::Error),

    #[error("Storage error: {0}")]
    StorageError(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl DomainError {
    /// Permanent errors are never retried: the same input fails the same way.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DomainError::MalformedPayload(_)
                | DomainError::InvalidTimestamp { .. }
                | DomainError::ValidationError(_)
        )
    }
}
