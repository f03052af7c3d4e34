use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::IdxConfig,
    errors::{AuthError, ProviderError},
};

use super::{IdxEndpoints, PkceMaterial};

/// Short-lived handle the sign-in widget uses to pick up the interaction.
///
/// Only lives for the login page render that asked for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InteractionHandle(String);

impl InteractionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Serialize)]
struct InteractParams<'a> {
    client_id: &'a str,
    scope: String,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
    redirect_uri: &'a str,
    state: &'a str,
}

#[derive(Deserialize)]
struct InteractResponse {
    #[serde(default)]
    interaction_handle: Option<String>,
}

/// Get the interaction handle to begin the flow.
///
/// Form-encoded POST of the client identity, the space-joined scopes and the
/// PKCE challenge to the provider's interact endpoint.
#[instrument(skip_all, fields(endpoint = %endpoints.interact))]
pub async fn initiate(
    http: &reqwest::Client,
    endpoints: &IdxEndpoints,
    config: &IdxConfig,
    pkce: &PkceMaterial,
    state: &str,
) -> Result<InteractionHandle, AuthError> {
    let params = InteractParams {
        client_id: &config.client_id,
        scope: config.scopes.join(" "),
        code_challenge: &pkce.code_challenge,
        code_challenge_method: pkce.code_challenge_method.as_str(),
        redirect_uri: &config.redirect_uri,
        state,
    };

    let response = http
        .post(&endpoints.interact)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| ProviderError::transport(&endpoints.interact, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::transport(&endpoints.interact, e))?;

    if !status.is_success() {
        return Err(ProviderError::Status {
            endpoint: endpoints.interact.clone(),
            status,
            body,
        }
        .into());
    }

    let parsed: InteractResponse = serde_json::from_str(&body)
        .map_err(|e| ProviderError::malformed(&endpoints.interact, e))?;

    match parsed.interaction_handle {
        Some(handle) if !handle.is_empty() => {
            debug!("Received interaction handle");
            Ok(InteractionHandle(handle))
        }
        _ => Err(ProviderError::malformed(&endpoints.interact, "missing interaction_handle").into()),
    }
}
