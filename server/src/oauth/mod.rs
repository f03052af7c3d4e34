//! OAuth module for the interaction-code flow against the identity provider
//! This includes PKCE, interaction handles, token exchange, ID token
//! verification and the user-info lookup

pub mod interact;
pub mod jwk;
pub mod pkce;
pub mod token;
pub mod userinfo;
pub mod utils;

pub use interact::InteractionHandle;
pub use jwk::{TokenVerifier, VerifiedClaims};
pub use pkce::{CodeChallengeMethod, PkceMaterial};
pub use token::TokenSet;

use color_eyre::eyre::{eyre, WrapErr};

/// The identity provider URLs this client talks to, all derived from the issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxEndpoints {
    pub issuer: String,
    pub interact: String,
    pub token: String,
    pub userinfo: String,
    pub discovery: String,
    pub keys: String,
    /// `scheme://host[:port]` of the issuer, handed to the sign-in widget
    pub base_url: String,
}

impl IdxEndpoints {
    pub fn from_issuer(issuer: &str) -> color_eyre::Result<Self> {
        let issuer = issuer.trim_end_matches('/').to_string();
        let parsed = url::Url::parse(&issuer)
            .wrap_err_with(|| format!("Issuer is not a valid URL: {issuer}"))?;

        if parsed.host_str().is_none() {
            return Err(eyre!("Issuer has no host: {issuer}"));
        }

        Ok(Self {
            interact: format!("{issuer}/oauth2/v1/interact"),
            token: format!("{issuer}/oauth2/v1/token"),
            userinfo: format!("{issuer}/oauth2/v1/userinfo"),
            discovery: format!("{issuer}/.well-known/openid-configuration"),
            keys: format!("{issuer}/oauth2/v1/keys"),
            base_url: parsed.origin().ascii_serialization(),
            issuer,
        })
    }
}
