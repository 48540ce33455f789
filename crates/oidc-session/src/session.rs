//! Session model and token application
//!
//! `apply_token_response` is the only way token fields change outside of a
//! full clear. It is a pure function so the manager can compute the new token
//! set first and then swap it in under the write lock.

use std::time::{Duration, SystemTime};

use common::Secret;
use oidc_auth::TokenResponse;
use serde::Serialize;

/// Share of the server-declared lifetime after which a token is treated as
/// expired, in thousandths.
const EXPIRY_FRACTION_PER_MILLE: u64 = 900;

/// Authenticated/unauthenticated status, independent of whether an access
/// token is currently cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    Authenticated,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::NoSession => "no_session",
            SessionState::Authenticated => "authenticated",
        }
    }
}

/// Why the session state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeReason {
    /// Hydration found a stored refresh token
    FoundToken,
    /// Hydration found no stored refresh token
    NoToken,
    Authenticated,
    Logout,
    /// The server or the store no longer backs the session
    Invalid,
}

impl StateChangeReason {
    pub fn label(&self) -> &'static str {
        match self {
            StateChangeReason::FoundToken => "found_token",
            StateChangeReason::NoToken => "no_token",
            StateChangeReason::Authenticated => "authenticated",
            StateChangeReason::Logout => "logout",
            StateChangeReason::Invalid => "invalid",
        }
    }
}

/// Published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub name: String,
    pub state: SessionState,
    pub reason: StateChangeReason,
}

/// Token material held in memory. The refresh token mirrors the token store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tokens {
    pub access_token: Option<Secret<String>>,
    pub id_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: Option<SystemTime>,
}

impl Tokens {
    /// A refresh is due when a refresh token exists but the access token is
    /// missing, has no recorded expiry, or has expired.
    pub fn needs_refresh(&self, now: SystemTime) -> bool {
        if self.refresh_token.is_none() {
            return false;
        }
        match (&self.access_token, self.expires_at) {
            (None, _) | (_, None) => true,
            (Some(_), Some(expires_at)) => now >= expires_at,
        }
    }

    /// The access token if it is present and still fresh.
    pub fn valid_access_token(&self, now: SystemTime) -> Option<String> {
        let token = self.access_token.as_ref()?;
        match self.expires_at {
            Some(expires_at) if now < expires_at => Some(token.to_plain()),
            _ => None,
        }
    }
}

/// The in-memory session for one named client instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub name: String,
    pub client_id: String,
    pub state: SessionState,
    pub tokens: Tokens,
}

impl Session {
    pub fn new(name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            state: SessionState::NoSession,
            tokens: Tokens::default(),
        }
    }

    /// Drop every token and return to `NoSession`.
    pub fn clear(&mut self) {
        self.state = SessionState::NoSession;
        self.tokens = Tokens::default();
    }
}

/// Expiry instant for a token issued at `now` with a lifetime of
/// `expires_in` seconds, taken at 90% of that lifetime.
///
/// Returns `None` if the instant is not representable.
pub fn compute_expiry(now: SystemTime, expires_in: u64) -> Option<SystemTime> {
    let millis = expires_in.saturating_mul(EXPIRY_FRACTION_PER_MILLE);
    now.checked_add(Duration::from_millis(millis))
}

/// Merge a token response into the current token set.
///
/// Fields absent from the response keep their current value; nothing is ever
/// cleared here.
pub fn apply_token_response(current: &Tokens, response: &TokenResponse, now: SystemTime) -> Tokens {
    fn merge(current: &Option<Secret<String>>, incoming: &Option<String>) -> Option<Secret<String>> {
        match incoming {
            Some(value) => Some(Secret::from(value.as_str())),
            None => current.clone(),
        }
    }

    Tokens {
        access_token: merge(&current.access_token, &response.access_token),
        id_token: merge(&current.id_token, &response.id_token),
        refresh_token: merge(&current.refresh_token, &response.refresh_token),
        expires_at: response
            .expires_in
            .and_then(|secs| compute_expiry(now, secs))
            .or(current.expires_at),
    }
}
