//! Server error classification
//!
//! Maps errors from a refresh or a biometric grant to the side effect the
//! session manager applies before propagating them. Only two cases mutate
//! local state; everything else passes through untouched.

use oidc_auth::INVALID_GRANT;

use crate::error::Error;

/// `invalid_grant` descriptions that mean the biometric credential itself is
/// gone, as opposed to a stale or replayed challenge.
const CREDENTIALS_INVALIDATED_PATTERNS: &[&str] = &[
    "credentials invalidated",
    "credential invalidated",
    "credentials_invalidated",
    "key invalidated",
    "key revoked",
    "unknown key",
];

/// What to do locally in response to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Surface to the caller unchanged
    Passthrough,
    /// The refresh token is dead: clear the session
    ClearSession,
    /// The biometric key is dead: purge its stored id
    PurgeBiometricKey,
}

/// Classify an error returned by the refresh grant.
pub fn classify_refresh_error(error: &Error) -> ErrorDisposition {
    match error.protocol() {
        Some(pe) if pe.is(INVALID_GRANT) => ErrorDisposition::ClearSession,
        _ => ErrorDisposition::Passthrough,
    }
}

/// Classify an error returned by the biometric jwt-bearer grant.
pub fn classify_biometric_error(error: &Error) -> ErrorDisposition {
    let Some(pe) = error.protocol() else {
        return ErrorDisposition::Passthrough;
    };
    if !pe.is(INVALID_GRANT) {
        return ErrorDisposition::Passthrough;
    }
    let description = pe.description.as_deref().unwrap_or_default().to_lowercase();
    if CREDENTIALS_INVALIDATED_PATTERNS
        .iter()
        .any(|pattern| description.contains(pattern))
    {
        ErrorDisposition::PurgeBiometricKey
    } else {
        ErrorDisposition::Passthrough
    }
}
