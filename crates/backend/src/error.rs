//! Error types for collaborator operations

/// Errors from storage, signing and browser collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("cancelled by user")]
    Cancelled,
}

/// Result alias for collaborator operations.
pub type Result<T> = std::result::Result<T, BackendError>;
