//! HttpTransport against a local fake authorization server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use backend::{HttpTransport, Transport};
use oidc_auth::{ChallengePurpose, Error, TokenRequest};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorded {
    forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    discovery_hits: Arc<Mutex<u32>>,
}

async fn discovery(State((base, rec)): State<(String, Recorded)>) -> impl IntoResponse {
    *rec.discovery_hits.lock().unwrap() += 1;
    Json(serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "revocation_endpoint": format!("{base}/revoke"),
        "challenge_endpoint": format!("{base}/challenge"),
    }))
}

async fn token(
    State((_, rec)): State<(String, Recorded)>,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    rec.forms.lock().unwrap().push(form.clone());
    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") if form.get("refresh_token").map(String::as_str) == Some("rt_revoked") => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked",
            })),
        )
            .into_response(),
        Some("refresh_token") => Json(serde_json::json!({
            "access_token": "at_refreshed",
            "expires_in": 3600,
            "token_type": "Bearer",
        }))
        .into_response(),
        Some("urn:ietf:params:oauth:grant-type:token-exchange") => Json(serde_json::json!({
            "access_token": "app_session_1",
            "issued_token_type": "urn:openid:params:token-type:app-session",
        }))
        .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "unexpected grant").into_response(),
    }
}

async fn userinfo(headers: HeaderMap) -> axum::response::Response {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer at_good") => Json(serde_json::json!({
            "sub": "user-1",
            "email": "user@example.com",
        }))
        .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid_token"})),
        )
            .into_response(),
    }
}

async fn revoke(
    State((_, rec)): State<(String, Recorded)>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    rec.forms.lock().unwrap().push(form);
    StatusCode::OK
}

async fn challenge(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    let purpose = form.get("purpose").cloned().unwrap_or_default();
    Json(serde_json::json!({ "challenge": format!("nonce-for-{purpose}") }))
}

async fn start_auth_server() -> (String, Recorded, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");
    let rec = Recorded::default();

    let app = Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .route("/revoke", post(revoke))
        .route("/challenge", post(challenge))
        .with_state((base.clone(), rec.clone()));

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base, rec, handle)
}

fn transport(base: &str) -> HttpTransport {
    HttpTransport::new(reqwest::Client::new(), base, "client-1")
}

#[tokio::test]
async fn discovery_is_fetched_once() {
    let (base, rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let config = transport.discovery().await.unwrap();
    assert_eq!(config.token_endpoint, format!("{base}/token"));
    transport.discovery().await.unwrap();
    transport
        .request_challenge(ChallengePurpose::Anonymous)
        .await
        .unwrap();

    assert_eq!(*rec.discovery_hits.lock().unwrap(), 1);
}

#[tokio::test]
async fn refresh_grant_posts_form_and_parses_response() {
    let (base, rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let response = transport
        .exchange_token(&TokenRequest::RefreshToken {
            refresh_token: "rt_1".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.access_token.as_deref(), Some("at_refreshed"));
    assert_eq!(response.expires_in, Some(3600));
    assert_eq!(response.refresh_token, None);

    let forms = rec.forms.lock().unwrap();
    assert_eq!(forms[0].get("client_id").map(String::as_str), Some("client-1"));
    assert_eq!(forms[0].get("refresh_token").map(String::as_str), Some("rt_1"));
}

#[tokio::test]
async fn invalid_grant_surfaces_as_protocol_error() {
    let (base, _rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let err = transport
        .exchange_token(&TokenRequest::RefreshToken {
            refresh_token: "rt_revoked".into(),
        })
        .await
        .unwrap_err();
    match err {
        Error::Protocol(pe) => {
            assert!(pe.is("invalid_grant"));
            assert_eq!(pe.description.as_deref(), Some("refresh token revoked"));
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn user_info_uses_bearer_token() {
    let (base, _rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let info = transport.user_info("at_good").await.unwrap();
    assert_eq!(info.sub, "user-1");
    assert_eq!(
        info.claim("email").and_then(|v| v.as_str()),
        Some("user@example.com")
    );

    let err = transport.user_info("at_bad").await.unwrap_err();
    assert!(
        matches!(&err, Error::Protocol(pe) if pe.is("invalid_token")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn revoke_sends_refresh_token_hint() {
    let (base, rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    transport.revoke("rt_1").await.unwrap();

    let forms = rec.forms.lock().unwrap();
    assert_eq!(forms[0].get("token").map(String::as_str), Some("rt_1"));
    assert_eq!(
        forms[0].get("token_type_hint").map(String::as_str),
        Some("refresh_token")
    );
}

#[tokio::test]
async fn challenge_is_scoped_to_purpose() {
    let (base, _rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let nonce = transport
        .request_challenge(ChallengePurpose::BiometricEnrollment)
        .await
        .unwrap();
    assert_eq!(nonce, "nonce-for-biometric_enrollment");
}

#[tokio::test]
async fn app_session_token_uses_token_exchange() {
    let (base, rec, _server) = start_auth_server().await;
    let transport = transport(&base);

    let token = transport.app_session_token("rt_1").await.unwrap();
    assert_eq!(token, "app_session_1");

    let forms = rec.forms.lock().unwrap();
    assert_eq!(forms[0].get("subject_token").map(String::as_str), Some("rt_1"));
    assert_eq!(
        forms[0].get("subject_token_type").map(String::as_str),
        Some("urn:ietf:params:oauth:token-type:refresh_token")
    );
    assert_eq!(
        forms[0].get("requested_token_type").map(String::as_str),
        Some("urn:openid:params:token-type:app-session")
    );
}

#[tokio::test]
async fn unreachable_issuer_is_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport(&format!("http://{addr}"));
    let err = transport.discovery().await.unwrap_err();
    assert!(matches!(err, Error::Http(_)), "got {err:?}");
}
