use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::AuthError;

use super::utils::{base64_url_encode, secure_random_bytes};

/// Random bytes behind a code verifier; 86 bytes encode to 115 base64url characters
const CODE_VERIFIER_BYTES: usize = 86;

/// The only challenge method the identity provider is asked to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

/// PKCE data for one authorization flow.
///
/// Used when requesting an interaction handle and again when the interaction
/// code is exchanged for tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceMaterial {
    /// PKCE code verifier - the original random string
    pub code_verifier: String,
    /// PKCE code challenge - the hashed and encoded verifier
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
}

impl PkceMaterial {
    /// Generate a fresh verifier and its S256 challenge
    pub fn generate() -> Result<Self, AuthError> {
        let code_verifier = base64_url_encode(&secure_random_bytes(CODE_VERIFIER_BYTES)?);
        let code_challenge = code_challenge_for(&code_verifier);

        Ok(Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CodeChallengeMethod::S256,
        })
    }

    /// True when the stored challenge still derives from the stored verifier
    pub fn is_consistent(&self) -> bool {
        !self.code_verifier.is_empty()
            && self.code_challenge == code_challenge_for(&self.code_verifier)
    }
}

/// `challenge = BASE64URL-NOPAD(SHA256(verifier))`
pub fn code_challenge_for(code_verifier: &str) -> String {
    base64_url_encode(&Sha256::digest(code_verifier.as_bytes()))
}
