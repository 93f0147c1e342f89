use thiserror::Error;

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Structural problems detected before a request leaves the gateway or reaches consensus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request ID must not be empty")]
    EmptyRequestId,
    #[error("must have at least 1 request")]
    EmptyBatch,
    #[error("request batch size exceeds maximum of {max}")]
    BatchTooLarge { max: usize },
    #[error("secret ID must not be nil at index {index}")]
    MissingSecretId { index: usize },
    #[error("secret ID must have both key and owner set at index {index}")]
    IncompleteSecretId { index: usize },
    #[error("encrypted value must not be empty at index {index}")]
    EmptyEncryptedValue { index: usize },
    #[error("duplicate secret ID found at index {index}: {id}")]
    DuplicateSecretId { index: usize, id: String },
    #[error("owner must not be empty")]
    EmptyOwner,
}
