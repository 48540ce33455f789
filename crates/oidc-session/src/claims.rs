//! ID token claim inspection
//!
//! The signature is not checked here; the token came straight from the token
//! endpoint over TLS and is only read for client-side decisions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

/// Decode the payload segment of a compact JWT.
pub fn decode_payload(jwt: &str) -> Option<Map<String, Value>> {
    let mut segments = jwt.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return None,
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Whether the ID token grants reauthentication.
///
/// True when `claim` is present and set to boolean `true` (or the string
/// `"true"`).
pub fn is_reauthenticable(id_token: &str, claim: &str) -> bool {
    let Some(claims) = decode_payload(id_token) else {
        return false;
    };
    match claims.get(claim) {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => value.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) fn fake_id_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}
