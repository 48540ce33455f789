//! OIDC UserInfo retrieval

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::error_from_body;

/// Claims returned by the UserInfo endpoint. `sub` is the only required claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(flatten)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl UserInfo {
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}

pub async fn fetch_user_info(
    client: &reqwest::Client,
    userinfo_endpoint: &str,
    access_token: &str,
) -> Result<UserInfo> {
    let response = client
        .get(userinfo_endpoint)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("userinfo request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(error_from_body("userinfo endpoint", status.as_u16(), &body));
    }

    response
        .json::<UserInfo>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid userinfo response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_claims_are_flattened() {
        let json = r#"{"sub":"user-1","email":"a@example.com","email_verified":true}"#;
        let info: UserInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.sub, "user-1");
        assert_eq!(info.claim("email").and_then(|v| v.as_str()), Some("a@example.com"));
        assert_eq!(info.claim("email_verified"), Some(&serde_json::Value::Bool(true)));
        assert!(info.claim("sub").is_none());
    }

    #[test]
    fn missing_sub_is_rejected() {
        let result: std::result::Result<UserInfo, _> = serde_json::from_str(r#"{"email":"x"}"#);
        assert!(result.is_err());
    }
}
