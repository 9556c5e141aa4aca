use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("a requester may not target their own business")]
    SelfConnection,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("room provisioning failed: {0}")]
    ProvisioningFailed(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("transient store failure: {0}")]
    TransientStore(String),
}

impl DomainError {
    /// Transient failures are safe to retry for idempotent operations;
    /// everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::TransientStore(_))
    }
}
