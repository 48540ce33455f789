//! reqwest-backed `Transport`
//!
//! The discovery document is fetched once on first use and cached for the
//! lifetime of the transport. A failed fetch is not cached, so the next call
//! retries.

use std::future::Future;
use std::pin::Pin;

use oidc_auth::{
    ChallengePurpose, DiscoveryConfig, Error, Result, TOKEN_TYPE_APP_SESSION,
    TOKEN_TYPE_REFRESH_TOKEN, TokenRequest, TokenResponse, UserInfo,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::Transport;

pub struct HttpTransport {
    client: reqwest::Client,
    issuer: String,
    client_id: String,
    discovery: OnceCell<DiscoveryConfig>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            issuer: issuer.into(),
            client_id: client_id.into(),
            discovery: OnceCell::new(),
        }
    }

    /// Seed the transport with an already-known discovery document.
    pub fn with_discovery(mut self, config: DiscoveryConfig) -> Self {
        self.discovery = OnceCell::new_with(Some(config));
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn config(&self) -> Result<&DiscoveryConfig> {
        self.discovery
            .get_or_try_init(|| async {
                let config = oidc_auth::fetch_discovery(&self.client, &self.issuer).await?;
                info!(issuer = %config.issuer, "discovery document loaded");
                Ok::<_, Error>(config)
            })
            .await
    }
}

impl Transport for HttpTransport {
    fn discovery(&self) -> Pin<Box<dyn Future<Output = Result<DiscoveryConfig>> + Send + '_>> {
        Box::pin(async move { self.config().await.cloned() })
    }

    fn request_challenge(
        &self,
        purpose: ChallengePurpose,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let config = self.config().await?;
            let endpoint =
                config.require(config.challenge_endpoint.as_deref(), "challenge_endpoint")?;
            debug!(purpose = purpose.as_str(), "requesting challenge");
            oidc_auth::request_challenge(&self.client, endpoint, &self.client_id, purpose).await
        })
    }

    fn exchange_token<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let config = self.config().await?;
            oidc_auth::exchange_token(&self.client, &config.token_endpoint, &self.client_id, request)
                .await
        })
    }

    fn revoke<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let config = self.config().await?;
            let Some(endpoint) = config.revocation_endpoint.as_deref() else {
                debug!("issuer has no revocation endpoint, skipping revoke");
                return Ok(());
            };
            oidc_auth::revoke_token(&self.client, endpoint, &self.client_id, refresh_token).await
        })
    }

    fn user_info<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserInfo>> + Send + 'a>> {
        Box::pin(async move {
            let config = self.config().await?;
            let endpoint =
                config.require(config.userinfo_endpoint.as_deref(), "userinfo_endpoint")?;
            oidc_auth::fetch_user_info(&self.client, endpoint, access_token).await
        })
    }

    fn app_session_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let request = TokenRequest::TokenExchange {
                subject_token: refresh_token.to_string(),
                subject_token_type: TOKEN_TYPE_REFRESH_TOKEN.to_string(),
                requested_token_type: TOKEN_TYPE_APP_SESSION.to_string(),
            };
            let response = self.exchange_token(&request).await?;
            response.access_token.ok_or_else(|| {
                Error::InvalidResponse("token exchange response has no access_token".into())
            })
        })
    }
}
