use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use tower_cookies::Key;

use crate::{
    config::{IdxConfig, ServerSettings},
    oauth::{utils::secure_random_bytes, IdxEndpoints, TokenVerifier},
};

/// Timeout for every call to the identity provider
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdxConfig>,
    pub endpoints: Arc<IdxEndpoints>,
    pub http: reqwest::Client,
    pub cookie_key: Key,
    pub secure_cookies: bool,
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(config: IdxConfig, cookie_key: Key, secure_cookies: bool) -> color_eyre::Result<Self> {
        let endpoints = IdxEndpoints::from_issuer(&config.issuer)?;

        let http = reqwest::ClientBuilder::new()
            .timeout(PROVIDER_TIMEOUT)
            .use_rustls_tls()
            .build()
            .wrap_err("Failed to build HTTP client")?;

        let verifier = TokenVerifier::new(http.clone(), &endpoints);

        Ok(Self {
            config: Arc::new(config),
            endpoints: Arc::new(endpoints),
            http,
            cookie_key,
            secure_cookies,
            verifier: Arc::new(verifier),
        })
    }

    pub fn from_env(settings: &ServerSettings) -> color_eyre::Result<Self> {
        secure_random_bytes(1).wrap_err("Secure random source is unusable")?;

        let config = IdxConfig::load().wrap_err("Invalid identity provider configuration")?;
        tracing::info!(?config, "Loaded identity provider configuration");

        Self::new(
            config,
            settings.cookie_key.clone(),
            settings.secure_cookies,
        )
    }
}
