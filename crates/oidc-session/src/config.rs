//! Session configuration
//!
//! Loaded from TOML, then overlaid with `OIDC_ISSUER` / `OIDC_CLIENT_ID` from
//! the environment. Validation failures are fatal at construction.

use std::path::{Path, PathBuf};

use oidc_auth::AuthorizationRequest;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Partition key for the token and key stores
    #[serde(default = "default_name")]
    pub name: String,
    pub issuer: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Ask the browser for a session that shares no cookies with the system
    /// browser
    #[serde(default)]
    pub ephemeral_browser_session: bool,
    /// ID token claim that must be true before `reauthenticate` is allowed
    #[serde(default = "default_reauth_claim")]
    pub reauth_claim: String,
    /// Where a `FileStore` keeps refresh tokens and key ids
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_name() -> String {
    "default".into()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".into(), "offline_access".into()]
}

fn default_reauth_claim() -> String {
    "reauthenticable".into()
}

impl SessionConfig {
    /// Build a config in code. Defaults match the TOML defaults.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            name: default_name(),
            issuer: issuer.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            ephemeral_browser_session: false,
            reauth_claim: default_reauth_claim(),
            store_path: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Load from a TOML file, overlay environment variables, and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: SessionConfig = toml::from_str(&contents)?;

        if let Ok(issuer) = std::env::var("OIDC_ISSUER") {
            config.issuer = issuer;
        }
        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            config.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if self.name.trim().is_empty() {
            return Err(common::Error::Config("session name must not be empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(common::Error::MissingField("client_id"));
        }
        if !self.issuer.starts_with("http://") && !self.issuer.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "issuer must start with http:// or https://, got: {}",
                self.issuer
            )));
        }
        Url::parse(&self.redirect_uri).map_err(|e| {
            common::Error::Config(format!("invalid redirect_uri {}: {e}", self.redirect_uri))
        })?;
        Ok(())
    }

    /// Authorization request pre-filled with this client's redirect and scopes.
    pub fn default_request(&self) -> AuthorizationRequest {
        AuthorizationRequest::new(self.redirect_uri.clone()).with_scopes(self.scopes.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("session.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const VALID: &str = r#"
issuer = "https://auth.example.com"
client_id = "mobile-app"
redirect_uri = "com.example.app:/oauth/callback"
"#;

    #[test]
    fn load_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            remove_env("OIDC_ISSUER");
            remove_env("OIDC_CLIENT_ID");
        }
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::load(&write_config(&dir, VALID)).unwrap();

        assert_eq!(config.name, "default");
        assert_eq!(config.client_id, "mobile-app");
        assert_eq!(config.scopes, vec!["openid", "offline_access"]);
        assert_eq!(config.reauth_claim, "reauthenticable");
        assert!(!config.ephemeral_browser_session);
        assert!(config.store_path.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            set_env("OIDC_ISSUER", "https://other.example.com");
            set_env("OIDC_CLIENT_ID", "from-env");
        }
        let dir = tempfile::tempdir().unwrap();
        let result = SessionConfig::load(&write_config(&dir, VALID));
        unsafe {
            remove_env("OIDC_ISSUER");
            remove_env("OIDC_CLIENT_ID");
        }

        let config = result.unwrap();
        assert_eq!(config.issuer, "https://other.example.com");
        assert_eq!(config.client_id, "from-env");
    }

    #[test]
    fn full_file_round_trips_every_field() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            remove_env("OIDC_ISSUER");
            remove_env("OIDC_CLIENT_ID");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
name = "work"
issuer = "https://auth.example.com"
client_id = "mobile-app"
redirect_uri = "com.example.app:/oauth/callback"
scopes = ["openid", "profile"]
ephemeral_browser_session = true
reauth_claim = "can_reauth"
store_path = "/var/lib/app/sessions.json"
"#,
        );
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.name, "work");
        assert_eq!(config.scopes, vec!["openid", "profile"]);
        assert!(config.ephemeral_browser_session);
        assert_eq!(config.reauth_claim, "can_reauth");
        assert_eq!(
            config.store_path.as_deref(),
            Some(Path::new("/var/lib/app/sessions.json"))
        );
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let err = SessionConfig::new("https://auth.example.com", " ", "app:/cb")
            .validate()
            .unwrap_err();
        assert!(matches!(err, common::Error::MissingField("client_id")));
    }

    #[test]
    fn non_http_issuer_is_rejected() {
        let err = SessionConfig::new("ftp://auth.example.com", "c", "app:/cb")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("issuer"), "got: {err}");
    }

    #[test]
    fn bad_redirect_uri_is_rejected() {
        let err = SessionConfig::new("https://auth.example.com", "c", "not a uri")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("redirect_uri"), "got: {err}");
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = SessionConfig::new("https://auth.example.com", "c", "app:/cb")
            .with_name("")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("name"), "got: {err}");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SessionConfig::load(Path::new("/nonexistent/session.toml")).is_err());
    }

    #[test]
    fn default_request_carries_redirect_and_scopes() {
        let config = SessionConfig::new("https://auth.example.com", "c", "app:/cb");
        let request = config.default_request();
        assert_eq!(request.redirect_uri, "app:/cb");
        assert!(request.scope.contains("openid"));
        assert!(request.scope.contains("offline_access"));
    }
}
