use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::errors::ProviderError;

use super::IdxEndpoints;

/// Profile attributes of the signed-in user, keyed by claim name.
///
/// Only for display. Every failure is logged and yields an empty map.
#[instrument(skip_all, fields(endpoint = %endpoints.userinfo))]
pub async fn fetch_profile(
    http: &reqwest::Client,
    endpoints: &IdxEndpoints,
    access_token: &str,
) -> BTreeMap<String, String> {
    match request_profile(http, endpoints, access_token).await {
        Ok(body) => flatten_profile(body),
        Err(e) => {
            warn!(error = %e, "Could not fetch user profile");
            BTreeMap::new()
        }
    }
}

async fn request_profile(
    http: &reqwest::Client,
    endpoints: &IdxEndpoints,
    access_token: &str,
) -> Result<Value, ProviderError> {
    let response = http
        .get(&endpoints.userinfo)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| ProviderError::transport(&endpoints.userinfo, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            endpoint: endpoints.userinfo.clone(),
            status,
            body: String::new(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::malformed(&endpoints.userinfo, e))
}

/// Keep strings, render numbers and booleans as their JSON text, drop the rest
pub fn flatten_profile(body: Value) -> BTreeMap<String, String> {
    let Value::Object(attributes) = body else {
        return BTreeMap::new();
    };

    attributes
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            Value::Number(n) => Some((name, n.to_string())),
            Value::Bool(b) => Some((name, b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        })
        .collect()
}
