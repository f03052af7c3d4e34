use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    config::IdxConfig,
    errors::{AuthError, ProviderError},
};

use super::IdxEndpoints;

/// Raw body of the token endpoint, either a token set or an OAuth error payload
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// The tokens returned by a successful exchange, not yet verified
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    /// The token type (usually "Bearer")
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Turn the provider's answer into a token set or the error it describes.
    ///
    /// An `error` field wins over everything else, including a 2xx status.
    pub fn into_token_set(
        self,
        endpoint: &str,
        status: reqwest::StatusCode,
    ) -> Result<TokenSet, AuthError> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(AuthError::ExchangeRejected {
                error,
                description: self.error_description.unwrap_or_default(),
            });
        }

        if !status.is_success() {
            return Err(ProviderError::Status {
                endpoint: endpoint.to_string(),
                status,
                body: String::new(),
            }
            .into());
        }

        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing access_token"))?;
        let id_token = self
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::malformed(endpoint, "missing id_token"))?;

        Ok(TokenSet {
            access_token,
            id_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            scope: self.scope,
        })
    }
}

#[derive(Serialize)]
struct ExchangeParams<'a> {
    grant_type: &'static str,
    interaction_code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    code_verifier: &'a str,
}

/// Exchange an interaction code plus the original PKCE verifier for tokens.
///
/// The parameters travel in the query string of an empty form POST, which is
/// what the provider's token endpoint expects for this grant.
#[instrument(skip_all, fields(endpoint = %endpoints.token))]
pub async fn exchange(
    http: &reqwest::Client,
    endpoints: &IdxEndpoints,
    config: &IdxConfig,
    interaction_code: &str,
    code_verifier: &str,
) -> Result<TokenSet, AuthError> {
    let params = ExchangeParams {
        grant_type: "interaction_code",
        interaction_code,
        client_id: &config.client_id,
        client_secret: &config.client_secret,
        code_verifier,
    };

    let response = http
        .post(&endpoints.token)
        .query(&params)
        .header(
            reqwest::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .header(reqwest::header::ACCEPT, "application/json")
        .body("")
        .send()
        .await
        .map_err(|e| ProviderError::transport(&endpoints.token, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::transport(&endpoints.token, e))?;

    let parsed: TokenResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(ProviderError::Status {
                endpoint: endpoints.token.clone(),
                status,
                body,
            }
            .into())
        }
        Err(e) => return Err(ProviderError::malformed(&endpoints.token, e).into()),
    };

    let token_set = parsed.into_token_set(&endpoints.token, status)?;
    info!(token_type = %token_set.token_type, "Exchanged interaction code for tokens");

    Ok(token_set)
}
