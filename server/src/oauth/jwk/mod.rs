use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    decode, decode_header,
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, Validation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, instrument, warn};

use crate::errors::{AuthError, ProviderError};

use super::{utils::constant_time_eq, IdxEndpoints};

/// How long a fetched key set is trusted before it is fetched again
pub const KEY_SET_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum gap between two key set fetches forced by unknown kids
pub const KID_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

/// Clock skew tolerated on `exp` and `iat`, in seconds
pub const LEEWAY_SECS: u64 = 120;

const REQUIRED_CLAIMS: [&str; 5] = ["iss", "aud", "sub", "exp", "iat"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// Payload of an identity token whose signature and claims checked out
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct ProviderMetadata {
    #[serde(default)]
    jwks_uri: Option<String>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
    /// Set when this fetch was forced by a token with an unknown kid
    kid_refreshed_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < KEY_SET_TTL
    }

    fn kid_refresh_cooling_down(&self) -> bool {
        self.kid_refreshed_at
            .is_some_and(|at| at.elapsed() < KID_REFRESH_COOLDOWN)
    }
}

/// Checks identity tokens against the provider's published signing keys.
///
/// The key set is fetched lazily and shared by every request.
pub struct TokenVerifier {
    http: reqwest::Client,
    discovery_url: String,
    fallback_keys_url: String,
    jwks_uri: OnceCell<String>,
    cache: RwLock<Option<CachedKeys>>,
}

impl TokenVerifier {
    pub fn new(http: reqwest::Client, endpoints: &IdxEndpoints) -> Self {
        Self {
            http,
            discovery_url: endpoints.discovery.clone(),
            fallback_keys_url: endpoints.keys.clone(),
            jwks_uri: OnceCell::new(),
            cache: RwLock::new(None),
        }
    }

    /// Verify signature, issuer, audience, expiry, issued-at and nonce.
    ///
    /// Every check that fails on the token itself comes back as
    /// [`AuthError::TokenInvalid`] with the detail for the logs. Failing to
    /// fetch the keys is a [`ProviderError`].
    #[instrument(skip_all, fields(audience = expected_audience, issuer = expected_issuer))]
    pub async fn verify(
        &self,
        id_token: &str,
        expected_audience: &str,
        expected_issuer: &str,
        expected_nonce: Option<&str>,
    ) -> Result<VerifiedClaims, AuthError> {
        let header = decode_header(id_token)
            .map_err(|e| AuthError::TokenInvalid(format!("malformed token header: {e}")))?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(AuthError::TokenInvalid(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::TokenInvalid("token header has no kid".to_string()))?;

        let jwk = self
            .find_key(&kid)
            .await?
            .ok_or_else(|| AuthError::TokenInvalid(format!("no published key with kid {kid}")))?;

        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::TokenInvalid(format!("unusable key {kid}: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = LEEWAY_SECS;
        validation.set_audience(&[expected_audience]);
        validation.set_issuer(&[expected_issuer]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);

        let claims = decode::<VerifiedClaims>(id_token, &key, &validation)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))?
            .claims;

        if claims.iat > now_secs() + LEEWAY_SECS {
            return Err(AuthError::TokenInvalid(format!(
                "token issued in the future (iat {})",
                claims.iat
            )));
        }

        match (claims.nonce.as_deref(), expected_nonce) {
            (Some(actual), Some(expected)) if constant_time_eq(actual, expected) => {}
            (Some(_), _) => {
                return Err(AuthError::TokenInvalid("nonce mismatch".to_string()));
            }
            (None, _) => warn!("Identity token carries no nonce claim"),
        }

        debug!(sub = %claims.sub, "Identity token verified");
        Ok(claims)
    }

    /// Look a key up in the cached set, refreshing once when it is stale or
    /// does not know the kid.
    ///
    /// A refresh forced by an unknown kid is not repeated within
    /// [`KID_REFRESH_COOLDOWN`].
    async fn find_key(&self, kid: &str) -> Result<Option<Jwk>, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(jwk) = cache
                .as_ref()
                .filter(|c| c.is_fresh())
                .and_then(|c| c.keys.find(kid))
            {
                return Ok(Some(jwk.clone()));
            }
        }

        let mut cache = self.cache.write().await;

        let kid_miss = match cache.as_ref().filter(|c| c.is_fresh()) {
            Some(cached) => {
                // Another request may have refreshed while this one waited
                if let Some(jwk) = cached.keys.find(kid) {
                    return Ok(Some(jwk.clone()));
                }
                if cached.kid_refresh_cooling_down() {
                    debug!(kid, "Unknown kid, key set was refreshed moments ago");
                    return Ok(None);
                }
                debug!(kid, "Unknown kid, refreshing key set");
                true
            }
            None => false,
        };

        let keys = self.fetch_keys().await?;
        let jwk = keys.find(kid).cloned();
        let now = Instant::now();
        *cache = Some(CachedKeys {
            keys,
            fetched_at: now,
            kid_refreshed_at: kid_miss.then_some(now),
        });

        Ok(jwk)
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let jwks_uri = self.jwks_uri().await;
        let response = self
            .http
            .get(jwks_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::transport(jwks_uri, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                endpoint: jwks_uri.to_string(),
                status,
                body,
            }
            .into());
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(jwks_uri, e))?;

        debug!(count = keys.keys.len(), "Fetched signing keys");
        Ok(keys)
    }

    /// Key set location from the discovery document. Only a successful
    /// lookup is remembered.
    async fn jwks_uri(&self) -> &str {
        let discovered = self
            .jwks_uri
            .get_or_try_init(|| self.discover_jwks_uri())
            .await;

        match discovered {
            Ok(uri) => uri,
            Err(e) => {
                warn!(error = %e, fallback = %self.fallback_keys_url, "Discovery failed, using default key set location");
                &self.fallback_keys_url
            }
        }
    }

    async fn discover_jwks_uri(&self) -> Result<String, ProviderError> {
        let response = self
            .http
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&self.discovery_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                endpoint: self.discovery_url.clone(),
                status,
                body: String::new(),
            });
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(&self.discovery_url, e))?;

        metadata
            .jwks_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| ProviderError::malformed(&self.discovery_url, "no jwks_uri"))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
