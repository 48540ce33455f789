//! OIDC discovery document
//!
//! Only the endpoints the session manager calls are modelled; unknown
//! metadata fields are ignored on deserialization.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::constants::WELL_KNOWN_PATH;
use crate::error::{Error, Result};

/// Subset of the OpenID Provider Metadata used by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    /// Issues server nonces for proof-of-possession grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_endpoint: Option<String>,
}

impl DiscoveryConfig {
    /// Endpoint lookup that turns an absent optional endpoint into an error.
    pub fn require<'a>(&self, endpoint: Option<&'a str>, name: &str) -> Result<&'a str> {
        endpoint.ok_or_else(|| Error::Discovery(format!("issuer {} has no {name}", self.issuer)))
    }
}

/// Build the discovery URL for an issuer.
///
/// A trailing slash on the issuer is dropped so `https://idp/` and
/// `https://idp` resolve to the same document.
pub fn discovery_url(issuer: &str) -> Result<Url> {
    let base = issuer.trim_end_matches('/');
    Url::parse(&format!("{base}{WELL_KNOWN_PATH}"))
        .map_err(|e| Error::InvalidUrl(format!("issuer {issuer}: {e}")))
}

/// Fetch and parse the discovery document.
pub async fn fetch_discovery(client: &reqwest::Client, issuer: &str) -> Result<DiscoveryConfig> {
    let url = discovery_url(issuer)?;
    debug!(url = %url, "fetching discovery document");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(format!("discovery request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!(
            "discovery endpoint returned {status}"
        )));
    }

    let config = response
        .json::<DiscoveryConfig>()
        .await
        .map_err(|e| Error::Discovery(format!("invalid discovery document: {e}")))?;

    if config.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        warn!(
            expected = issuer,
            actual = %config.issuer,
            "discovery document issuer does not match configured issuer"
        );
    }
    Ok(config)
}
