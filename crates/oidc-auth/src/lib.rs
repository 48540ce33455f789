//! OAuth2 / OIDC client protocol library
//!
//! The wire-level half of the session manager: PKCE generation, authorize-URL
//! construction and redirect parsing, token endpoint requests, discovery, and
//! the `ProtocolError` taxonomy. Nothing here holds session state; the
//! `oidc-session` crate owns that.
//!
//! Authorization code flow:
//! 1. `VerifierHolder::generate()` creates the verifier/challenge pair
//! 2. `build_authorize_url()` renders the request against the discovery document
//! 3. The browser round-trip returns a redirect, interpreted by `parse_callback()`
//! 4. `exchange_token()` trades the code plus verifier for a `TokenResponse`

pub mod authorize;
pub mod challenge;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod token;
pub mod userinfo;

pub use authorize::{
    AuthorizationCode, AuthorizationOutcome, AuthorizationRequest, Prompt, ResponseType,
    build_authorize_url, parse_callback,
};
pub use challenge::{ChallengePurpose, request_challenge};
pub use constants::*;
pub use discovery::{DiscoveryConfig, discovery_url, fetch_discovery};
pub use error::{Error, ProtocolError, Result};
pub use pkce::{VerifierHolder, compute_challenge, generate_verifier};
pub use token::{TokenRequest, TokenResponse, exchange_token, revoke_token};
pub use userinfo::{UserInfo, fetch_user_info};
