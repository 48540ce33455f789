//! Authorization request construction and redirect interpretation
//!
//! `build_authorize_url` is a pure function of its inputs: the same request
//! always renders the same query string, and absent optional fields are left
//! out entirely rather than sent empty. `parse_callback` turns whatever URI the
//! browser hands back into exactly one `AuthorizationOutcome`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{CODE_CHALLENGE_METHOD, INVALID_REQUEST};
use crate::discovery::DiscoveryConfig;
use crate::error::{Error, ProtocolError, Result};

/// OIDC `prompt` values. Ordered so a prompt set serializes deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
            Prompt::Consent => "consent",
            Prompt::SelectAccount => "select_account",
        }
    }
}

/// `response_type` of the authorization request.
///
/// `None` is the silent flow: no code is issued, so no PKCE challenge is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    None,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::None => "none",
        }
    }
}

/// Everything that goes into the authorize-URL query besides the client id
/// and PKCE challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub redirect_uri: String,
    pub response_type: ResponseType,
    pub scope: BTreeSet<String>,
    pub state: Option<String>,
    pub prompt: BTreeSet<Prompt>,
    pub login_hint: Option<String>,
    pub id_token_hint: Option<String>,
    pub max_age: Option<u64>,
    /// Preference order is significant, so this stays a list
    pub ui_locales: Vec<String>,
    pub suppress_idp_session_cookie: bool,
}

impl AuthorizationRequest {
    /// A `code` request with no optional parameters set.
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            response_type: ResponseType::Code,
            scope: BTreeSet::new(),
            state: None,
            prompt: BTreeSet::new(),
            login_hint: None,
            id_token_hint: None,
            max_age: None,
            ui_locales: Vec::new(),
            suppress_idp_session_cookie: false,
        }
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt.insert(prompt);
        self
    }

    pub fn with_login_hint(mut self, hint: impl Into<String>) -> Self {
        self.login_hint = Some(hint.into());
        self
    }

    pub fn with_id_token_hint(mut self, hint: impl Into<String>) -> Self {
        self.id_token_hint = Some(hint.into());
        self
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_ui_locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ui_locales = locales.into_iter().map(Into::into).collect();
        self
    }

    pub fn suppressing_idp_session_cookie(mut self) -> Self {
        self.suppress_idp_session_cookie = true;
        self
    }
}

/// Render the authorize URL against the discovery document.
///
/// Parameter order is fixed. `challenge` is `None` for flows that issue no
/// code (`response_type=none`); the challenge fields are then omitted.
pub fn build_authorize_url(
    request: &AuthorizationRequest,
    discovery: &DiscoveryConfig,
    client_id: &str,
    challenge: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(&discovery.authorization_endpoint).map_err(|e| {
        Error::InvalidUrl(format!(
            "authorization endpoint {}: {e}",
            discovery.authorization_endpoint
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", &request.redirect_uri);
        query.append_pair("response_type", request.response_type.as_str());
        if !request.scope.is_empty() {
            query.append_pair("scope", &join(request.scope.iter().map(String::as_str)));
        }
        if let Some(state) = &request.state {
            query.append_pair("state", state);
        }
        if let Some(challenge) = challenge {
            query.append_pair("code_challenge", challenge);
            query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        }
        if !request.prompt.is_empty() {
            query.append_pair("prompt", &join(request.prompt.iter().map(Prompt::as_str)));
        }
        if let Some(hint) = &request.login_hint {
            query.append_pair("login_hint", hint);
        }
        if let Some(hint) = &request.id_token_hint {
            query.append_pair("id_token_hint", hint);
        }
        if let Some(max_age) = request.max_age {
            query.append_pair("max_age", &max_age.to_string());
        }
        if !request.ui_locales.is_empty() {
            query.append_pair(
                "ui_locales",
                &join(request.ui_locales.iter().map(String::as_str)),
            );
        }
        if request.suppress_idp_session_cookie {
            query.append_pair("suppress_idp_session_cookie", "true");
        }
    }

    Ok(url)
}

fn join<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(" ")
}

/// A successful authorization response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: Option<String>,
    /// Redirect base exactly as the browser returned it (no query, no
    /// fragment). Sent back as `redirect_uri` in the token exchange.
    pub redirect_uri: String,
}

/// Result of the external browser step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Success(AuthorizationCode),
    Failed(ProtocolError),
    /// User closed the browser. Never produced by `parse_callback`.
    Cancelled,
}

/// Interpret the redirect URI returned by the browser.
///
/// `error` always wins over `code`. A response with neither is reported as
/// `invalid_request`, as is a URI that does not parse.
pub fn parse_callback(redirect: &str) -> AuthorizationOutcome {
    if let Err(e) = Url::parse(redirect) {
        return AuthorizationOutcome::Failed(
            ProtocolError::new(INVALID_REQUEST)
                .with_description(format!("malformed redirect URI: {e}")),
        );
    }

    let without_fragment = redirect.split('#').next().unwrap_or(redirect);
    let (base, query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    let mut error_uri = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match &*key {
            "code" => &mut code,
            "state" => &mut state,
            "error" => &mut error,
            "error_description" => &mut error_description,
            "error_uri" => &mut error_uri,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    if let Some(code) = error {
        return AuthorizationOutcome::Failed(ProtocolError {
            code,
            description: error_description,
            state,
            error_uri,
        });
    }

    match code {
        Some(code) => AuthorizationOutcome::Success(AuthorizationCode {
            code,
            state,
            redirect_uri: base.to_string(),
        }),
        None => AuthorizationOutcome::Failed(
            ProtocolError::new(INVALID_REQUEST)
                .with_description("authorization response carried no code")
                .with_state(state),
        ),
    }
}
