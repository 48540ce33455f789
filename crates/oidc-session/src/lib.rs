//! Client-side OIDC session management
//!
//! `SessionManager` owns one named session: its state machine, token set and
//! expiry. It drives interactive (authorization code + PKCE), anonymous and
//! biometric grants through the collaborator traits in the `backend` crate,
//! refreshes lazily with at most one refresh in flight, and publishes a
//! `SessionEvent` on every state transition.
//!
//! Session lifecycle:
//! 1. `SessionManager::new()` validates the config; `hydrate()` probes the
//!    token store and emits `FoundToken` or `NoToken`
//! 2. A grant succeeds → tokens committed, state `Authenticated`
//! 3. `access_token()` refreshes when the token passes 90% of its lifetime
//! 4. `invalid_grant` on refresh, or `logout()` → state `NoSession`

pub mod claims;
pub mod classify;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod refresh;
pub mod session;

pub use classify::{ErrorDisposition, classify_biometric_error, classify_refresh_error};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use manager::{Collaborators, SessionManager};
pub use refresh::{Role, SingleFlight};
pub use session::{
    Session, SessionEvent, SessionState, StateChangeReason, Tokens, apply_token_response,
    compute_expiry,
};
