//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! A fresh verifier is generated for every authorization attempt. The S256
//! challenge travels in the authorize URL; the verifier itself is sent only
//! once, with the token exchange, and is never persisted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes per verifier (256 bits of entropy)
const VERIFIER_BYTES: usize = 32;

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 bytes from the thread-local CSPRNG, encoded as lowercase hex (64
/// characters). Hex is a subset of the RFC 7636 unreserved alphabet and sits
/// inside the 43-128 character range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Verifier/challenge pair for one authorization attempt.
///
/// The verifier is consumed by `into_verifier()` when the token exchange is
/// built, so a holder cannot be used for two exchanges.
pub struct VerifierHolder {
    verifier: String,
    challenge: String,
}

impl VerifierHolder {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn into_verifier(self) -> String {
        self.verifier
    }
}

impl std::fmt::Debug for VerifierHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierHolder")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}
