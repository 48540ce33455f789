//! Error types for OAuth protocol operations

use std::fmt;

use serde::{Deserialize, Serialize};

/// An error reported by the authorization server.
///
/// Produced either from an authorization redirect carrying `error=...` or from
/// a token endpoint error body. `code` is the stable value callers branch on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub error_uri: Option<String>,
}

impl ProtocolError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: None,
            state: None,
            error_uri: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }

    /// Whether this error carries the given code.
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors from OAuth protocol operations.
///
/// `Clone` so one failed refresh can be handed to every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("authorization server error: {0}")]
    Protocol(ProtocolError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("discovery error: {0}")]
    Discovery(String),
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        Error::Protocol(error)
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
