//! Error types for session operations

use backend::BackendError;
use oidc_auth::ProtocolError;

/// Errors from session operations.
///
/// Local-state conditions get their own variants so callers can branch
/// without parsing messages. `Clone` so a single refresh outcome reaches
/// every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("session manager has not been hydrated")]
    NotConfigured,

    #[error("no access token available")]
    NoAccessToken,

    #[error("no active session")]
    NoSession,

    #[error("current ID token does not allow reauthentication")]
    NotReauthenticable,

    #[error("biometric key not found")]
    BiometricKeyNotFound,

    #[error("anonymous key not found")]
    AnonymousKeyNotFound,

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The user dismissed the browser or biometric prompt.
    #[error("cancelled by user")]
    Cancelled,

    #[error("authorization server error: {0}")]
    Protocol(ProtocolError),

    #[error("authorization response state does not match the request")]
    StateMismatch,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl Error {
    /// The server-reported error, if this is one.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(pe) => Some(pe),
            _ => None,
        }
    }
}

impl From<oidc_auth::Error> for Error {
    fn from(error: oidc_auth::Error) -> Self {
        match error {
            oidc_auth::Error::Protocol(pe) => Error::Protocol(pe),
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        Error::Protocol(error)
    }
}

impl From<BackendError> for Error {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Storage(msg) => Error::Storage(msg),
            BackendError::KeyNotFound(msg) | BackendError::Signing(msg) => Error::Signing(msg),
            BackendError::Browser(msg) => Error::Browser(msg),
            BackendError::Cancelled => Error::Cancelled,
        }
    }
}

impl From<common::Error> for Error {
    fn from(error: common::Error) -> Self {
        Error::Config(error.to_string())
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
