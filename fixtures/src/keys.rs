//! Fixed ES256 keys the fixture provider signs identity tokens with

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context as _};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::{pkcs8::DecodePrivateKey, EncodedPoint, SecretKey};
use serde_json::{json, Value};

const PRIMARY_KEY_PEM: &str = include_str!("../keys/primary.pem");
const ROTATED_KEY_PEM: &str = include_str!("../keys/rotated.pem");
const UNPUBLISHED_KEY_PEM: &str = include_str!("../keys/unpublished.pem");

#[derive(Clone)]
pub struct FixtureKey {
    kid: String,
    encoding: EncodingKey,
    jwk: Value,
}

impl FixtureKey {
    pub fn from_pem(kid: &str, pem: &str) -> anyhow::Result<Self> {
        let secret = SecretKey::from_pkcs8_pem(pem)
            .map_err(|e| anyhow!("Failed to parse fixture key {kid}: {e}"))?;

        let encoded_point = EncodedPoint::from(secret.public_key());
        let x = encoded_point
            .x()
            .ok_or_else(|| anyhow!("Missing x coordinate in fixture key {kid}"))?;
        let y = encoded_point
            .y()
            .ok_or_else(|| anyhow!("Missing y coordinate in fixture key {kid}"))?;

        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
            "kid": kid,
            "alg": "ES256",
            "use": "sig",
        });

        let encoding = EncodingKey::from_ec_pem(pem.as_bytes())
            .with_context(|| format!("Failed to load fixture key {kid} for signing"))?;

        Ok(Self {
            kid: kid.to_string(),
            encoding,
            jwk,
        })
    }

    /// The key published by default
    pub fn primary() -> anyhow::Result<Self> {
        Self::from_pem("fixture-primary", PRIMARY_KEY_PEM)
    }

    /// The key published after a rotation
    pub fn rotated() -> anyhow::Result<Self> {
        Self::from_pem("fixture-rotated", ROTATED_KEY_PEM)
    }

    /// Never published, so anything it signs must fail verification.
    /// It claims the primary kid to look legitimate.
    pub fn unpublished() -> anyhow::Result<Self> {
        Self::from_pem("fixture-primary", UNPUBLISHED_KEY_PEM)
    }

    /// Never published, under a kid the provider has never heard of
    pub fn stray(kid: &str) -> anyhow::Result<Self> {
        Self::from_pem(kid, UNPUBLISHED_KEY_PEM)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwk(&self) -> &Value {
        &self.jwk
    }

    pub fn sign(&self, claims: &Value) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        header.typ = Some("JWT".to_string());

        jsonwebtoken::encode(&header, claims, &self.encoding).context("Failed to sign fixture token")
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Identity token claims as the provider issues them, valid for an hour
pub fn id_token_claims(issuer: &str, audience: &str, subject: &str, nonce: Option<&str>) -> Value {
    let now = now_secs();
    let mut claims = json!({
        "iss": issuer,
        "aud": audience,
        "sub": subject,
        "iat": now,
        "exp": now + 3600,
        "auth_time": now,
        "amr": ["pwd"],
    });

    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }

    claims
}
