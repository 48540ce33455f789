//! Token endpoint requests and responses
//!
//! Every grant the session manager performs is a POST to the token endpoint;
//! `TokenRequest` captures the grant-specific form fields. Error bodies are
//! decoded into `ProtocolError` so callers can branch on the OAuth error code.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    GRANT_AUTHORIZATION_CODE, GRANT_JWT_BEARER, GRANT_REFRESH_TOKEN, GRANT_TOKEN_EXCHANGE,
    TOKEN_TYPE_HINT_REFRESH,
};
use crate::error::{Error, ProtocolError, Result};

/// Response from the token endpoint.
///
/// Every field is optional: a refresh commonly omits `refresh_token` and
/// `id_token`, and an absent field must leave the session's value untouched.
/// `expires_in` is a delta in seconds from the response time.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A grant to present at the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenRequest {
    /// Interactive login: the code from the redirect plus the PKCE verifier.
    AuthorizationCode {
        code: String,
        verifier: String,
        redirect_uri: String,
    },
    RefreshToken { refresh_token: String },
    /// Anonymous and biometric logins: a signed assertion over a server challenge.
    JwtBearer { assertion: String },
    /// RFC 8693 exchange, used to mint app session tokens.
    TokenExchange {
        subject_token: String,
        subject_token_type: String,
        requested_token_type: String,
    },
}

impl TokenRequest {
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenRequest::AuthorizationCode { .. } => GRANT_AUTHORIZATION_CODE,
            TokenRequest::RefreshToken { .. } => GRANT_REFRESH_TOKEN,
            TokenRequest::JwtBearer { .. } => GRANT_JWT_BEARER,
            TokenRequest::TokenExchange { .. } => GRANT_TOKEN_EXCHANGE,
        }
    }

    /// Form fields for this grant, `grant_type` and `client_id` first.
    pub fn form(&self, client_id: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("grant_type", self.grant_type().to_string()),
            ("client_id", client_id.to_string()),
        ];
        match self {
            TokenRequest::AuthorizationCode {
                code,
                verifier,
                redirect_uri,
            } => {
                form.push(("code", code.clone()));
                form.push(("code_verifier", verifier.clone()));
                form.push(("redirect_uri", redirect_uri.clone()));
            }
            TokenRequest::RefreshToken { refresh_token } => {
                form.push(("refresh_token", refresh_token.clone()));
            }
            TokenRequest::JwtBearer { assertion } => {
                form.push(("assertion", assertion.clone()));
            }
            TokenRequest::TokenExchange {
                subject_token,
                subject_token_type,
                requested_token_type,
            } => {
                form.push(("subject_token", subject_token.clone()));
                form.push(("subject_token_type", subject_token_type.clone()));
                form.push(("requested_token_type", requested_token_type.clone()));
            }
        }
        form
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type())
            .finish_non_exhaustive()
    }
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_uri: Option<String>,
}

/// Map a non-success response to an error.
///
/// A body carrying an OAuth `error` field becomes `Error::Protocol`; anything
/// else is an HTTP-level failure.
pub(crate) fn error_from_body(endpoint: &str, status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => Error::Protocol(ProtocolError {
            code: parsed.error,
            description: parsed.error_description,
            state: None,
            error_uri: parsed.error_uri,
        }),
        Err(_) => Error::Http(format!("{endpoint} returned {status}: {body}")),
    }
}

/// Present a grant at the token endpoint.
pub async fn exchange_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    request: &TokenRequest,
) -> Result<TokenResponse> {
    debug!(grant_type = request.grant_type(), "token request");

    let response = client
        .post(token_endpoint)
        .form(&request.form(client_id))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(error_from_body("token endpoint", status.as_u16(), &body));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid token response: {e}")))
}

/// Revoke a refresh token (RFC 7009).
pub async fn revoke_token(
    client: &reqwest::Client,
    revocation_endpoint: &str,
    client_id: &str,
    refresh_token: &str,
) -> Result<()> {
    let response = client
        .post(revocation_endpoint)
        .form(&[
            ("token", refresh_token),
            ("token_type_hint", TOKEN_TYPE_HINT_REFRESH),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("revocation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(error_from_body(
            "revocation endpoint",
            status.as_u16(),
            &body,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(form: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn token_response_deserializes_partial_body() {
        let json = r#"{"access_token":"at_abc","expires_in":3600,"token_type":"Bearer"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token.as_deref(), Some("at_abc"));
        assert_eq!(token.refresh_token, None);
        assert_eq!(token.id_token, None);
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn token_response_debug_is_redacted() {
        let token = TokenResponse {
            access_token: Some("at_secret".into()),
            refresh_token: Some("rt_secret".into()),
            id_token: None,
            expires_in: Some(60),
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("at_secret"), "got: {debug}");
        assert!(!debug.contains("rt_secret"), "got: {debug}");
        assert!(debug.contains("expires_in"));
    }

    #[test]
    fn authorization_code_form() {
        let request = TokenRequest::AuthorizationCode {
            code: "code-1".into(),
            verifier: "verifier-1".into(),
            redirect_uri: "com.example.app:/callback".into(),
        };
        let form = request.form("client-1");
        assert_eq!(form[0], ("grant_type", "authorization_code".to_string()));
        assert_eq!(form[1], ("client_id", "client-1".to_string()));
        assert_eq!(field(&form, "code"), Some("code-1"));
        assert_eq!(field(&form, "code_verifier"), Some("verifier-1"));
        assert_eq!(field(&form, "redirect_uri"), Some("com.example.app:/callback"));
    }

    #[test]
    fn refresh_and_assertion_forms() {
        let refresh = TokenRequest::RefreshToken {
            refresh_token: "rt_1".into(),
        }
        .form("client-1");
        assert_eq!(field(&refresh, "grant_type"), Some("refresh_token"));
        assert_eq!(field(&refresh, "refresh_token"), Some("rt_1"));

        let bearer = TokenRequest::JwtBearer {
            assertion: "header.payload.sig".into(),
        }
        .form("client-1");
        assert_eq!(field(&bearer, "grant_type"), Some(GRANT_JWT_BEARER));
        assert_eq!(field(&bearer, "assertion"), Some("header.payload.sig"));
    }

    #[test]
    fn token_request_debug_hides_secrets() {
        let request = TokenRequest::RefreshToken {
            refresh_token: "rt_secret".into(),
        };
        let debug = format!("{request:?}");
        assert!(debug.contains("refresh_token"));
        assert!(!debug.contains("rt_secret"));
    }

    #[test]
    fn oauth_error_body_becomes_protocol_error() {
        let err = error_from_body(
            "token endpoint",
            400,
            r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
        );
        match err {
            Error::Protocol(pe) => {
                assert_eq!(pe.code, "invalid_grant");
                assert_eq!(pe.description.as_deref(), Some("refresh token revoked"));
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn non_oauth_error_body_is_http_error() {
        let err = error_from_body("token endpoint", 502, "<html>bad gateway</html>");
        match err {
            Error::Http(msg) => assert!(msg.contains("502"), "got: {msg}"),
            other => panic!("expected http error, got {other:?}"),
        }
    }
}
