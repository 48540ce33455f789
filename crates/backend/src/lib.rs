//! Collaborator contracts for the session manager
//!
//! The session core never touches the network, disk, key hardware or a
//! browser directly. It talks to the traits defined here, and the embedding
//! application supplies implementations:
//!
//! - `Transport`: OIDC HTTP calls (`HttpTransport` is the reqwest implementation)
//! - `TokenStore` / `KeyStore`: durable refresh token and key-id persistence
//!   (`FileStore`, `MemoryStore`)
//! - `SigningBackend`: produces signed assertions; never exposes private keys
//! - `Browser`: the system browser or web view that renders the consent UI
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn Transport>` and friends).

pub mod error;
pub mod file_store;
pub mod http;
pub mod memory;

pub use error::{BackendError, Result};
pub use file_store::FileStore;
pub use http::HttpTransport;
pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;

use oidc_auth::{ChallengePurpose, DiscoveryConfig, TokenRequest, TokenResponse, UserInfo};
use serde::{Deserialize, Serialize};
use url::Url;

/// Device metadata forwarded to the signing backend and embedded in
/// assertions. Collected outside the core.
pub type DeviceInfo = serde_json::Value;

/// Which auxiliary key a key id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Anonymous,
    Biometric,
}

/// A signed JWT plus the id of the key that signed it.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedAssertion {
    pub key_id: String,
    pub jwt: String,
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("key_id", &self.key_id)
            .field("jwt", &"[REDACTED]")
            .finish()
    }
}

/// Presentation options for the biometric prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricOptions {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Allow the platform to fall back to device PIN/passcode
    #[serde(default)]
    pub allow_device_credential: bool,
}

/// What the browser step handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserResult {
    /// The final redirect URI, query string included
    Redirect(String),
    /// The user closed the browser before the redirect
    Cancelled,
}

/// HTTP calls against the authorization server.
///
/// Transport and HTTP failures come back as `oidc_auth::Error`; server-reported
/// OAuth errors as `oidc_auth::Error::Protocol`. Retry and timeout policy
/// belong to the implementation, not the caller.
pub trait Transport: Send + Sync {
    fn discovery(
        &self,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<DiscoveryConfig>> + Send + '_>>;

    fn request_challenge(
        &self,
        purpose: ChallengePurpose,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<String>> + Send + '_>>;

    fn exchange_token<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<TokenResponse>> + Send + 'a>>;

    fn revoke<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<()>> + Send + 'a>>;

    fn user_info<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<UserInfo>> + Send + 'a>>;

    fn app_session_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<String>> + Send + 'a>>;
}

/// Durable refresh token storage, keyed by session name.
pub trait TokenStore: Send + Sync {
    fn get<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        name: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn delete<'a>(&'a self, name: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Durable storage of anonymous and biometric key ids, keyed by session name.
pub trait KeyStore: Send + Sync {
    fn get_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    fn set_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
        key_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn delete_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Produces signed assertions with keys it owns.
///
/// Implementations wrap a secure enclave, keystore or software keys. Private
/// key material never crosses this boundary. A bound key that no longer
/// exists must be reported as `BackendError::KeyNotFound`, and a dismissed
/// biometric prompt as `BackendError::Cancelled`.
pub trait SigningBackend: Send + Sync {
    /// Sign with the existing anonymous key, or create one when `key_id` is None.
    fn create_or_get_anonymous_assertion<'a>(
        &'a self,
        key_id: Option<&'a str>,
        challenge: &'a str,
        device_info: &'a DeviceInfo,
    ) -> Pin<Box<dyn Future<Output = Result<SignedAssertion>> + Send + 'a>>;

    /// Create a biometric-gated key and sign the enrollment challenge with it.
    fn enable_biometric<'a>(
        &'a self,
        options: &'a BiometricOptions,
        challenge: &'a str,
        device_info: &'a DeviceInfo,
    ) -> Pin<Box<dyn Future<Output = Result<SignedAssertion>> + Send + 'a>>;

    /// Prompt for biometrics and sign with the bound key. Returns the JWT.
    fn authenticate_biometric<'a>(
        &'a self,
        options: &'a BiometricOptions,
        key_id: &'a str,
        challenge: &'a str,
        device_info: &'a DeviceInfo,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn remove_key<'a>(&'a self, key_id: &'a str)
    -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// The external browser or embedded web view.
pub trait Browser: Send + Sync {
    /// Open `authorize_url` and wait for navigation to `redirect_uri`.
    ///
    /// `ephemeral_session` asks for a browser session that shares no cookies
    /// with the system browser.
    fn authenticate<'a>(
        &'a self,
        authorize_url: &'a Url,
        redirect_uri: &'a str,
        ephemeral_session: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BrowserResult>> + Send + 'a>>;
}
