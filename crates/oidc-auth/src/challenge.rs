//! Server challenge issuance for proof-of-possession grants

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::error_from_body;

/// Why a challenge is being requested. Sent to the server so it can scope the
/// nonce to one kind of assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Anonymous,
    Promotion,
    BiometricEnrollment,
    BiometricAuthentication,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePurpose::Anonymous => "anonymous",
            ChallengePurpose::Promotion => "promotion",
            ChallengePurpose::BiometricEnrollment => "biometric_enrollment",
            ChallengePurpose::BiometricAuthentication => "biometric_authentication",
        }
    }
}

#[derive(Deserialize)]
struct ChallengeBody {
    challenge: String,
}

/// Obtain a single-use nonce for a signed assertion.
pub async fn request_challenge(
    client: &reqwest::Client,
    challenge_endpoint: &str,
    client_id: &str,
    purpose: ChallengePurpose,
) -> Result<String> {
    let response = client
        .post(challenge_endpoint)
        .form(&[("client_id", client_id), ("purpose", purpose.as_str())])
        .send()
        .await
        .map_err(|e| Error::Http(format!("challenge request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(error_from_body("challenge endpoint", status.as_u16(), &body));
    }

    let body = response
        .json::<ChallengeBody>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid challenge response: {e}")))?;
    Ok(body.challenge)
}
