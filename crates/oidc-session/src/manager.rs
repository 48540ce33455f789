//! Session manager: grant flows, lazy refresh and state events
//!
//! One `SessionManager` owns one named session. Token fields live behind a
//! tokio `RwLock` and change only by swapping in a fully merged `Tokens`
//! value, so readers never see half of a token response. No lock is held
//! across a browser round-trip, a signing prompt or a network call.
//!
//! Grant shape (interactive, anonymous, biometric):
//! 1. Obtain a server challenge when the grant needs proof of possession
//! 2. Obtain an authorization code or a signed assertion
//! 3. Exchange it at the token endpoint
//! 4. Fetch user info
//! 5. Commit tokens (store first, then memory) and emit a state event
//!
//! A successful interactive or anonymous login also disables any enrolled
//! biometric key, since that enrollment belonged to the previous login.

use std::sync::Arc;
use std::time::SystemTime;

use backend::{
    BackendError, BiometricOptions, Browser, BrowserResult, DeviceInfo, FileStore, HttpTransport,
    KeyKind, KeyStore, MemoryStore, SigningBackend, TokenStore, Transport,
};
use common::Secret;
use oidc_auth::{
    AuthorizationOutcome, AuthorizationRequest, ChallengePurpose, ResponseType, TokenRequest,
    TokenResponse, UserInfo, VerifierHolder,
};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::classify::{ErrorDisposition, classify_biometric_error, classify_refresh_error};
use crate::claims::is_reauthenticable;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::metrics::{record_grant, record_refresh, record_transition};
use crate::refresh::SingleFlight;
use crate::session::{
    Session, SessionEvent, SessionState, StateChangeReason, Tokens, apply_token_response,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// External capabilities the manager drives.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub token_store: Arc<dyn TokenStore>,
    pub key_store: Arc<dyn KeyStore>,
    /// Required for anonymous and biometric grants
    pub signer: Option<Arc<dyn SigningBackend>>,
    /// Required for interactive grants
    pub browser: Option<Arc<dyn Browser>>,
    pub device_info: DeviceInfo,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn Transport>,
        token_store: Arc<dyn TokenStore>,
        key_store: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            transport,
            token_store,
            key_store,
            signer: None,
            browser: None,
            device_info: DeviceInfo::Null,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn SigningBackend>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }
}

struct Inner {
    hydrated: bool,
    session: Session,
    user_info: Option<UserInfo>,
    /// Bumped on every clear and every grant commit, so an in-flight refresh
    /// that started under an older session cannot overwrite the current one.
    generation: u64,
}

type RefreshOutcome = Result<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Refresh even if the access token is still fresh
    Force,
    /// Skip the token endpoint when the access token is already fresh
    IfStale,
}

pub struct SessionManager {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    token_store: Arc<dyn TokenStore>,
    key_store: Arc<dyn KeyStore>,
    signer: Option<Arc<dyn SigningBackend>>,
    browser: Option<Arc<dyn Browser>>,
    device_info: DeviceInfo,
    inner: RwLock<Inner>,
    refresh_flight: SingleFlight<RefreshOutcome>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Validate the configuration and build an un-hydrated manager.
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = Session::new(config.name.clone(), config.client_id.clone());
        info!(session = %config.name, issuer = %config.issuer, "session manager configured");
        Ok(Self {
            transport: collaborators.transport,
            token_store: collaborators.token_store,
            key_store: collaborators.key_store,
            signer: collaborators.signer,
            browser: collaborators.browser,
            device_info: collaborators.device_info,
            inner: RwLock::new(Inner {
                hydrated: false,
                session,
                user_info: None,
                generation: 0,
            }),
            refresh_flight: SingleFlight::new(),
            events,
            config,
        })
    }

    /// Build a manager over `HttpTransport` and the configured store, then
    /// hydrate it.
    ///
    /// With `store_path` set, refresh tokens and key ids persist in a
    /// `FileStore`; otherwise they live in memory only.
    pub async fn connect(
        config: SessionConfig,
        client: reqwest::Client,
        signer: Option<Arc<dyn SigningBackend>>,
        browser: Option<Arc<dyn Browser>>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(
            client,
            config.issuer.clone(),
            config.client_id.clone(),
        ));
        let mut collaborators = match &config.store_path {
            Some(path) => {
                let store = Arc::new(FileStore::load(path.clone()).await?);
                Collaborators::new(transport, store.clone(), store)
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                Collaborators::new(transport, store.clone(), store)
            }
        };
        collaborators.signer = signer;
        collaborators.browser = browser;

        let manager = Self::new(config, collaborators)?;
        manager.hydrate().await?;
        Ok(manager)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receive a `SessionEvent` for every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Probe the token store and set the initial state. No network call.
    pub async fn hydrate(&self) -> Result<SessionState> {
        let stored = self.token_store.get(&self.config.name).await?;
        let (state, reason) = {
            let mut inner = self.inner.write().await;
            inner.hydrated = true;
            match stored {
                Some(refresh_token) => {
                    inner.session.state = SessionState::Authenticated;
                    inner.session.tokens = Tokens {
                        refresh_token: Some(Secret::new(refresh_token)),
                        ..Tokens::default()
                    };
                    (SessionState::Authenticated, StateChangeReason::FoundToken)
                }
                None => {
                    inner.session.clear();
                    (SessionState::NoSession, StateChangeReason::NoToken)
                }
            }
        };
        self.emit(state, reason);
        Ok(state)
    }

    pub async fn state(&self) -> Result<SessionState> {
        let inner = self.inner.read().await;
        if !inner.hydrated {
            return Err(Error::NotConfigured);
        }
        Ok(inner.session.state)
    }

    /// Snapshot of the in-memory session (tokens redacted in `Debug`).
    pub async fn session(&self) -> Result<Session> {
        let inner = self.inner.read().await;
        if !inner.hydrated {
            return Err(Error::NotConfigured);
        }
        Ok(inner.session.clone())
    }

    /// Interactive login through the browser.
    pub async fn authenticate(&self, request: AuthorizationRequest) -> Result<()> {
        let result = self.interactive_login(request).await;
        self.finish_grant("interactive", result)
    }

    /// Interactive login bound to the current user via `id_token_hint`.
    ///
    /// With biometric options supplied and a biometric key enrolled, the
    /// browser is skipped and the biometric grant's result is returned.
    pub async fn reauthenticate(
        &self,
        request: AuthorizationRequest,
        biometric: Option<BiometricOptions>,
    ) -> Result<()> {
        self.ensure_hydrated().await?;
        if let Some(options) = biometric
            && self.is_biometric_enabled().await?
        {
            debug!(session = %self.config.name, "reauthenticating with biometric key");
            return self.authenticate_biometric(&options).await;
        }
        let result = self.interactive_relogin(request).await;
        self.finish_grant("reauthenticate", result)
    }

    /// Login with a device-bound anonymous key.
    pub async fn authenticate_anonymous(&self) -> Result<()> {
        let result = self.anonymous_login().await;
        self.finish_grant("anonymous", result)
    }

    /// Upgrade an anonymous user to a full account.
    ///
    /// The anonymous key signs a promotion challenge that travels as
    /// `login_hint`; the interactive flow then completes the login and the
    /// anonymous key is discarded.
    pub async fn promote_anonymous(&self, request: AuthorizationRequest) -> Result<()> {
        let result = self.promotion_login(request).await;
        self.finish_grant("promotion", result)
    }

    /// Enroll a biometric-gated key for the current session.
    ///
    /// Any previously enrolled key is removed first. The enrollment assertion
    /// is exchanged at the token endpoint so the server binds the new key.
    pub async fn enable_biometric(&self, options: &BiometricOptions) -> Result<()> {
        let result = self.biometric_enrollment(options).await;
        self.finish_grant("biometric_enrollment", result)
    }

    /// Login by signing a challenge with the enrolled biometric key.
    ///
    /// Fails with `BiometricKeyNotFound` before any network call when no key
    /// id is stored. A key the signing backend no longer has, or an
    /// `invalid_grant` saying the credential was invalidated, purges the
    /// stored key id.
    pub async fn authenticate_biometric(&self, options: &BiometricOptions) -> Result<()> {
        let result = self.biometric_login(options).await;
        self.finish_grant("biometric", result)
    }

    /// Remove the enrolled biometric key, if any.
    pub async fn disable_biometric(&self) -> Result<()> {
        let name = &self.config.name;
        let Some(key_id) = self.key_store.get_key_id(name, KeyKind::Biometric).await? else {
            return Ok(());
        };
        if let Some(signer) = &self.signer
            && let Err(e) = signer.remove_key(&key_id).await
        {
            warn!(session = %name, error = %e, "failed to remove biometric key from signing backend");
        }
        self.key_store.delete_key_id(name, KeyKind::Biometric).await?;
        info!(session = %name, "biometric key disabled");
        Ok(())
    }

    pub async fn is_biometric_enabled(&self) -> Result<bool> {
        Ok(self
            .key_store
            .get_key_id(&self.config.name, KeyKind::Biometric)
            .await?
            .is_some())
    }

    /// A valid access token, refreshing first when one is due.
    ///
    /// Returns `None` when there is no session, including when a refresh just
    /// found the session invalid.
    pub async fn access_token(&self) -> Result<Option<String>> {
        self.ensure_hydrated().await?;
        let now = SystemTime::now();
        {
            let inner = self.inner.read().await;
            if let Some(token) = inner.session.tokens.valid_access_token(now) {
                return Ok(Some(token));
            }
            if !inner.session.tokens.needs_refresh(now) {
                return Ok(None);
            }
        }

        match self.run_refresh(RefreshMode::IfStale).await {
            Err(e) if classify_refresh_error(&e) == ErrorDisposition::ClearSession => Ok(None),
            other => other,
        }
    }

    /// Refresh now, joining any refresh already in flight.
    ///
    /// `invalid_grant` clears the session and is returned to every waiter.
    /// Other failures leave the session untouched.
    pub async fn refresh(&self) -> Result<Option<String>> {
        self.run_refresh(RefreshMode::Force).await
    }

    async fn run_refresh(&self, mode: RefreshMode) -> Result<Option<String>> {
        self.ensure_hydrated().await?;
        let (outcome, role) = self.refresh_flight.run(|| self.refresh_once(mode)).await;
        let label = match &outcome {
            Ok(Some(_)) => "success",
            Ok(None) => "cleared",
            Err(e) if classify_refresh_error(e) == ErrorDisposition::ClearSession => "cleared",
            Err(_) => "error",
        };
        record_refresh(label, role);
        outcome
    }

    /// One refresh against the token endpoint, run by the flight leader.
    ///
    /// The result is applied only if no clear or grant commit happened while
    /// the exchange was in flight (tracked by `generation`). A stale result is
    /// rolled back out of the token store instead.
    async fn refresh_once(&self, mode: RefreshMode) -> RefreshOutcome {
        let name = &self.config.name;
        let generation = {
            let inner = self.inner.read().await;
            // An earlier flight may have finished after our caller looked.
            if mode == RefreshMode::IfStale
                && let Some(token) = inner.session.tokens.valid_access_token(SystemTime::now())
            {
                return Ok(Some(token));
            }
            if inner.session.state != SessionState::Authenticated {
                return Ok(None);
            }
            inner.generation
        };

        let Some(refresh_token) = self.token_store.get(name).await? else {
            warn!(session = %name, "refresh requested but no refresh token is stored, clearing session");
            self.clear_session(StateChangeReason::Invalid, Some(generation))
                .await;
            return Ok(None);
        };

        debug!(session = %name, "refreshing access token");
        let request = TokenRequest::RefreshToken {
            refresh_token: refresh_token.clone(),
        };
        let response = match self.transport.exchange_token(&request).await {
            Ok(response) => response,
            Err(e) => {
                let error = Error::from(e);
                if classify_refresh_error(&error) == ErrorDisposition::ClearSession {
                    warn!(session = %name, error = %error, "refresh token rejected, clearing session");
                    if self
                        .clear_session(StateChangeReason::Invalid, Some(generation))
                        .await
                    {
                        self.delete_stored_if(&refresh_token).await;
                    }
                } else {
                    warn!(session = %name, error = %error, "refresh failed, session left intact");
                }
                return Err(error);
            }
        };
        let access_token = response.access_token.clone().ok_or(Error::NoAccessToken)?;

        if let Some(rotated) = &response.refresh_token {
            self.token_store.set(name, rotated).await?;
        }

        let applied = {
            let mut inner = self.inner.write().await;
            if inner.generation == generation {
                let mut tokens =
                    apply_token_response(&inner.session.tokens, &response, SystemTime::now());
                if tokens.refresh_token.is_none() {
                    tokens.refresh_token = Some(Secret::new(refresh_token));
                }
                inner.session.tokens = tokens;
                let previous =
                    std::mem::replace(&mut inner.session.state, SessionState::Authenticated);
                Some(previous != SessionState::Authenticated)
            } else {
                None
            }
        };

        match applied {
            Some(became_authenticated) => {
                if became_authenticated {
                    self.emit(SessionState::Authenticated, StateChangeReason::Authenticated);
                }
                info!(session = %name, "access token refreshed");
                Ok(Some(access_token))
            }
            None => {
                debug!(session = %name, "session changed during refresh, discarding result");
                Ok(self.discard_refresh(response.refresh_token.as_deref()).await)
            }
        }
    }

    /// Undo what a superseded refresh persisted and revoke its rotated token.
    /// Returns whatever access token the current session holds.
    async fn discard_refresh(&self, rotated: Option<&str>) -> Option<String> {
        let name = &self.config.name;
        let (current, access_token) = {
            let inner = self.inner.read().await;
            let tokens = &inner.session.tokens;
            (
                tokens.refresh_token.as_ref().map(Secret::to_plain),
                tokens.valid_access_token(SystemTime::now()),
            )
        };

        if let Some(rotated) = rotated
            && current.as_deref() != Some(rotated)
        {
            match self.token_store.get(name).await {
                Ok(Some(stored)) if stored == rotated => {
                    let restored = match &current {
                        Some(current) => self.token_store.set(name, current).await,
                        None => self.token_store.delete(name).await,
                    };
                    if let Err(e) = restored {
                        warn!(session = %name, error = %e, "failed to roll back superseded refresh token");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(session = %name, error = %e, "failed to read token store"),
            }
            if let Err(e) = self.transport.revoke(rotated).await {
                warn!(session = %name, error = %e, "superseded refresh token revocation failed");
            }
        }
        access_token
    }

    /// Delete the stored refresh token, unless something newer replaced it.
    async fn delete_stored_if(&self, refresh_token: &str) {
        let name = &self.config.name;
        let deleted = match self.token_store.get(name).await {
            Ok(Some(stored)) if stored == refresh_token => self.token_store.delete(name).await,
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = deleted {
            warn!(session = %name, error = %e, "failed to delete rejected refresh token");
        }
    }

    /// Clear the session, then revoke (best effort) and delete the stored
    /// refresh token.
    ///
    /// Memory is cleared first so a refresh finishing meanwhile sees a new
    /// generation and rolls its own store write back.
    pub async fn logout(&self) -> Result<()> {
        self.ensure_hydrated().await?;
        let name = &self.config.name;

        self.clear_session(StateChangeReason::Logout, None).await;
        if let Some(refresh_token) = self.token_store.get(name).await?
            && let Err(e) = self.transport.revoke(&refresh_token).await
        {
            warn!(session = %name, error = %e, "refresh token revocation failed");
        }
        self.token_store.delete(name).await?;
        info!(session = %name, "logged out");
        Ok(())
    }

    /// User info cached by the last grant or `fetch_user_info`.
    pub async fn user_info(&self) -> Option<UserInfo> {
        self.inner.read().await.user_info.clone()
    }

    /// Fetch user info with a valid access token and update the cache.
    pub async fn fetch_user_info(&self) -> Result<UserInfo> {
        let access_token = self.access_token().await?.ok_or(Error::NoAccessToken)?;
        let info = self.transport.user_info(&access_token).await?;
        self.inner.write().await.user_info = Some(info.clone());
        Ok(info)
    }

    /// Exchange the stored refresh token for an app session token.
    pub async fn app_session_token(&self) -> Result<String> {
        self.ensure_hydrated().await?;
        let refresh_token = self
            .token_store
            .get(&self.config.name)
            .await?
            .ok_or(Error::NoSession)?;
        Ok(self.transport.app_session_token(&refresh_token).await?)
    }

    async fn interactive_login(&self, request: AuthorizationRequest) -> Result<()> {
        self.ensure_hydrated().await?;
        let response = self.interactive(request).await?;
        self.commit(response).await?;
        self.disable_biometric_quietly().await;
        Ok(())
    }

    async fn interactive_relogin(&self, request: AuthorizationRequest) -> Result<()> {
        let id_token = self
            .inner
            .read()
            .await
            .session
            .tokens
            .id_token
            .as_ref()
            .map(Secret::to_plain)
            .ok_or(Error::NotReauthenticable)?;
        if !is_reauthenticable(&id_token, &self.config.reauth_claim) {
            return Err(Error::NotReauthenticable);
        }

        let response = self
            .interactive(request.with_id_token_hint(id_token))
            .await?;
        self.commit(response).await?;
        self.disable_biometric_quietly().await;
        Ok(())
    }

    async fn anonymous_login(&self) -> Result<()> {
        self.ensure_hydrated().await?;
        let signer = self.signer()?;
        let name = &self.config.name;

        let key_id = self.key_store.get_key_id(name, KeyKind::Anonymous).await?;
        let challenge = self
            .transport
            .request_challenge(ChallengePurpose::Anonymous)
            .await?;
        let assertion = match signer
            .create_or_get_anonymous_assertion(key_id.as_deref(), &challenge, &self.device_info)
            .await
        {
            Ok(assertion) => assertion,
            Err(BackendError::KeyNotFound(_)) => {
                warn!(session = %name, "anonymous key missing from signing backend, purging");
                self.key_store
                    .delete_key_id(name, KeyKind::Anonymous)
                    .await?;
                return Err(Error::AnonymousKeyNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let response = self
            .transport
            .exchange_token(&TokenRequest::JwtBearer {
                assertion: assertion.jwt,
            })
            .await?;
        self.commit(response).await?;
        self.key_store
            .set_key_id(name, KeyKind::Anonymous, &assertion.key_id)
            .await?;
        self.disable_biometric_quietly().await;
        Ok(())
    }

    async fn promotion_login(&self, request: AuthorizationRequest) -> Result<()> {
        self.ensure_hydrated().await?;
        let signer = self.signer()?;
        let name = &self.config.name;

        let key_id = self
            .key_store
            .get_key_id(name, KeyKind::Anonymous)
            .await?
            .ok_or(Error::AnonymousKeyNotFound)?;
        let challenge = self
            .transport
            .request_challenge(ChallengePurpose::Promotion)
            .await?;
        let proof = match signer
            .create_or_get_anonymous_assertion(Some(&key_id), &challenge, &self.device_info)
            .await
        {
            Ok(assertion) => assertion,
            Err(BackendError::KeyNotFound(_)) => {
                self.key_store
                    .delete_key_id(name, KeyKind::Anonymous)
                    .await?;
                return Err(Error::AnonymousKeyNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let response = self
            .interactive(request.with_login_hint(proof.jwt))
            .await?;
        self.commit(response).await?;

        if let Err(e) = signer.remove_key(&key_id).await {
            warn!(session = %name, error = %e, "failed to remove anonymous key");
        }
        self.key_store
            .delete_key_id(name, KeyKind::Anonymous)
            .await?;
        self.disable_biometric_quietly().await;
        Ok(())
    }

    async fn biometric_enrollment(&self, options: &BiometricOptions) -> Result<()> {
        self.ensure_hydrated().await?;
        if self.inner.read().await.session.state != SessionState::Authenticated {
            return Err(Error::NoSession);
        }
        let signer = self.signer()?;
        self.disable_biometric().await?;

        let challenge = self
            .transport
            .request_challenge(ChallengePurpose::BiometricEnrollment)
            .await?;
        let assertion = signer
            .enable_biometric(options, &challenge, &self.device_info)
            .await?;
        let response = self
            .transport
            .exchange_token(&TokenRequest::JwtBearer {
                assertion: assertion.jwt,
            })
            .await?;
        self.commit(response).await?;
        self.key_store
            .set_key_id(&self.config.name, KeyKind::Biometric, &assertion.key_id)
            .await?;
        info!(session = %self.config.name, key_id = %assertion.key_id, "biometric key enrolled");
        Ok(())
    }

    async fn biometric_login(&self, options: &BiometricOptions) -> Result<()> {
        self.ensure_hydrated().await?;
        let name = &self.config.name;
        let key_id = self
            .key_store
            .get_key_id(name, KeyKind::Biometric)
            .await?
            .ok_or(Error::BiometricKeyNotFound)?;
        let signer = self.signer()?;

        let challenge = self
            .transport
            .request_challenge(ChallengePurpose::BiometricAuthentication)
            .await?;
        let jwt = match signer
            .authenticate_biometric(options, &key_id, &challenge, &self.device_info)
            .await
        {
            Ok(jwt) => jwt,
            Err(BackendError::KeyNotFound(_)) => {
                self.purge_biometric_key(&key_id).await;
                return Err(Error::BiometricKeyNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let response = match self
            .transport
            .exchange_token(&TokenRequest::JwtBearer { assertion: jwt })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let error = Error::from(e);
                if classify_biometric_error(&error) == ErrorDisposition::PurgeBiometricKey {
                    self.purge_biometric_key(&key_id).await;
                }
                return Err(error);
            }
        };
        self.commit(response).await
    }

    async fn ensure_hydrated(&self) -> Result<()> {
        if self.inner.read().await.hydrated {
            Ok(())
        } else {
            Err(Error::NotConfigured)
        }
    }

    fn signer(&self) -> Result<&Arc<dyn SigningBackend>> {
        self.signer
            .as_ref()
            .ok_or(Error::MissingCollaborator("signing backend"))
    }

    fn browser(&self) -> Result<&Arc<dyn Browser>> {
        self.browser
            .as_ref()
            .ok_or(Error::MissingCollaborator("browser"))
    }

    /// Browser round-trip plus code exchange. No lock is held here.
    async fn interactive(&self, request: AuthorizationRequest) -> Result<TokenResponse> {
        let browser = self.browser()?;
        let discovery = self.transport.discovery().await?;

        let verifier = VerifierHolder::generate();
        let challenge = match request.response_type {
            ResponseType::Code => Some(verifier.challenge()),
            ResponseType::None => None,
        };
        let url = oidc_auth::build_authorize_url(
            &request,
            &discovery,
            &self.config.client_id,
            challenge,
        )?;

        let redirect = match browser
            .authenticate(&url, &request.redirect_uri, self.config.ephemeral_browser_session)
            .await?
        {
            BrowserResult::Redirect(redirect) => redirect,
            BrowserResult::Cancelled => return Err(Error::Cancelled),
        };

        let code = match oidc_auth::parse_callback(&redirect) {
            AuthorizationOutcome::Success(code) => code,
            AuthorizationOutcome::Failed(error) => return Err(Error::Protocol(error)),
            AuthorizationOutcome::Cancelled => return Err(Error::Cancelled),
        };
        if let Some(expected) = &request.state
            && code.state.as_deref() != Some(expected.as_str())
        {
            return Err(Error::StateMismatch);
        }

        Ok(self
            .transport
            .exchange_token(&TokenRequest::AuthorizationCode {
                code: code.code,
                verifier: verifier.into_verifier(),
                redirect_uri: code.redirect_uri,
            })
            .await?)
    }

    /// Persist and apply a grant's token response.
    async fn commit(&self, response: TokenResponse) -> Result<()> {
        let access_token = response
            .access_token
            .as_deref()
            .ok_or(Error::NoAccessToken)?;
        let user_info = self.transport.user_info(access_token).await?;

        if let Some(refresh_token) = &response.refresh_token {
            self.token_store
                .set(&self.config.name, refresh_token)
                .await?;
        }

        let became_authenticated = {
            let mut inner = self.inner.write().await;
            let tokens = apply_token_response(&inner.session.tokens, &response, SystemTime::now());
            let state = if tokens.refresh_token.is_some() {
                SessionState::Authenticated
            } else {
                SessionState::NoSession
            };
            let previous = inner.session.state;
            inner.session.tokens = tokens;
            inner.session.state = state;
            inner.user_info = Some(user_info);
            inner.generation += 1;
            previous != state && state == SessionState::Authenticated
        };
        if became_authenticated {
            self.emit(SessionState::Authenticated, StateChangeReason::Authenticated);
        }
        Ok(())
    }

    /// Clear tokens and cached user info.
    ///
    /// With `expected` set, nothing happens unless the generation still
    /// matches. Logout always emits; other reasons emit only when the session
    /// was authenticated. Returns whether the session was cleared.
    async fn clear_session(&self, reason: StateChangeReason, expected: Option<u64>) -> bool {
        let was_authenticated = {
            let mut inner = self.inner.write().await;
            if expected.is_some_and(|generation| generation != inner.generation) {
                return false;
            }
            let previous = inner.session.state;
            inner.session.clear();
            inner.user_info = None;
            inner.generation += 1;
            previous == SessionState::Authenticated
        };
        if was_authenticated || reason == StateChangeReason::Logout {
            self.emit(SessionState::NoSession, reason);
        }
        true
    }

    async fn purge_biometric_key(&self, key_id: &str) {
        let name = &self.config.name;
        warn!(session = %name, key_id, "biometric key invalidated, purging");
        if let Err(e) = self.key_store.delete_key_id(name, KeyKind::Biometric).await {
            warn!(session = %name, error = %e, "failed to delete biometric key id");
        }
        if let Some(signer) = &self.signer
            && let Err(e) = signer.remove_key(key_id).await
        {
            debug!(session = %name, error = %e, "signing backend could not remove key");
        }
    }

    async fn disable_biometric_quietly(&self) {
        if let Err(e) = self.disable_biometric().await {
            warn!(session = %self.config.name, error = %e, "failed to disable biometric after login");
        }
    }

    fn finish_grant(&self, grant: &'static str, result: Result<()>) -> Result<()> {
        let outcome = match &result {
            Ok(()) => {
                info!(session = %self.config.name, grant, "grant succeeded");
                "success"
            }
            Err(Error::Cancelled) => {
                debug!(session = %self.config.name, grant, "grant cancelled by user");
                "cancelled"
            }
            Err(e) => {
                warn!(session = %self.config.name, grant, error = %e, "grant failed");
                "error"
            }
        };
        record_grant(grant, outcome);
        result
    }

    fn emit(&self, state: SessionState, reason: StateChangeReason) {
        record_transition(reason);
        info!(session = %self.config.name, state = state.label(), reason = reason.label(), "session state changed");
        // No subscribers is not an error.
        let _ = self.events.send(SessionEvent {
            name: self.config.name.clone(),
            state,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use oidc_auth::DiscoveryConfig;

    /// Answers only the token endpoint; each exchange mints `at_<n>`.
    #[derive(Default)]
    struct TokenEndpoint {
        exchanges: AtomicUsize,
    }

    fn unanswered<'a, T: Send + 'a>()
    -> Pin<Box<dyn Future<Output = oidc_auth::Result<T>> + Send + 'a>> {
        Box::pin(async { Err(oidc_auth::Error::Http("endpoint not served".into())) })
    }

    impl Transport for TokenEndpoint {
        fn discovery(
            &self,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<DiscoveryConfig>> + Send + '_>> {
            unanswered()
        }

        fn request_challenge(
            &self,
            _purpose: ChallengePurpose,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<String>> + Send + '_>> {
            unanswered()
        }

        fn exchange_token<'a>(
            &'a self,
            _request: &'a TokenRequest,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<TokenResponse>> + Send + 'a>> {
            Box::pin(async move {
                let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TokenResponse {
                    access_token: Some(format!("at_{n}")),
                    expires_in: Some(3600),
                    ..Default::default()
                })
            })
        }

        fn revoke<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<()>> + Send + 'a>> {
            unanswered()
        }

        fn user_info<'a>(
            &'a self,
            _access_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<UserInfo>> + Send + 'a>> {
            unanswered()
        }

        fn app_session_token<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<String>> + Send + 'a>> {
            unanswered()
        }
    }

    async fn hydrated_with_refresh_token() -> (SessionManager, Arc<TokenEndpoint>) {
        let transport = Arc::new(TokenEndpoint::default());
        let store = Arc::new(MemoryStore::new());
        store.set("default", "rt_1").await.unwrap();
        let config = SessionConfig::new("https://auth.example.com", "client-1", "app:/cb");
        let manager = SessionManager::new(
            config,
            Collaborators::new(transport.clone(), store.clone(), store),
        )
        .unwrap();
        manager.hydrate().await.unwrap();
        (manager, transport)
    }

    #[tokio::test]
    async fn stale_check_is_repeated_by_the_flight_leader() {
        let (manager, transport) = hydrated_with_refresh_token().await;
        assert_eq!(manager.refresh().await.unwrap().as_deref(), Some("at_1"));

        // A caller that saw a stale token before the flight above finished.
        let outcome = manager.refresh_once(RefreshMode::IfStale).await.unwrap();

        assert_eq!(outcome.as_deref(), Some("at_1"));
        assert_eq!(transport.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_refresh_ignores_a_fresh_token() {
        let (manager, transport) = hydrated_with_refresh_token().await;
        manager.refresh().await.unwrap();

        assert_eq!(manager.refresh().await.unwrap().as_deref(), Some("at_2"));
        assert_eq!(transport.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_without_a_session_does_not_touch_the_network() {
        let (manager, transport) = hydrated_with_refresh_token().await;
        manager.clear_session(StateChangeReason::Invalid, None).await;

        assert_eq!(manager.refresh().await.unwrap(), None);
        assert_eq!(transport.exchanges.load(Ordering::SeqCst), 0);
    }
}
