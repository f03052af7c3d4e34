use std::ops::{Deref, DerefMut};

use axum::{extract::FromRequestParts, http::request::Parts, response::Response};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    cookies::CookieJar,
    errors::AuthError,
    oauth::{
        utils::{generate_nonce, generate_state},
        PkceMaterial, TokenSet,
    },
    state::AppState,
};

/// Cookie holding the whole session
pub const SESSION_COOKIE_NAME: &str = "okta-self-hosted-session-store";

pub const SESSION_MAX_AGE: Duration = Duration::days(1);

/// Secrets of one login attempt, from login page render to callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlow {
    pub pkce: PkceMaterial,
    pub state: String,
    /// Nonce handed to the widget on the most recent render
    pub nonce: String,
}

impl PendingFlow {
    /// Whether the stored material can still carry a flow to completion
    pub fn is_usable(&self) -> bool {
        self.pkce.is_consistent() && !self.state.is_empty() && !self.nonce.is_empty()
    }
}

/// The identity and access token, only ever stored together
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub id_token: String,
    pub access_token: String,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub id: Uuid,
    #[serde(default)]
    pub flow: Option<PendingFlow>,
    #[serde(default)]
    pub tokens: Option<SessionTokens>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            flow: None,
            tokens: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens
            .as_ref()
            .is_some_and(|tokens| !tokens.id_token.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.access_token.as_str())
    }

    /// Make sure a login attempt is in progress and give it a fresh nonce.
    ///
    /// PKCE material and state survive re-renders until a callback consumes
    /// them; the nonce is replaced every time.
    pub fn prepare_flow(&mut self) -> Result<PendingFlow, AuthError> {
        let nonce = generate_nonce()?;

        let flow = match self.flow.take().filter(PendingFlow::is_usable) {
            Some(existing) => PendingFlow { nonce, ..existing },
            None => {
                debug!(session = %self.id, "Starting a new login flow");
                PendingFlow {
                    pkce: PkceMaterial::generate()?,
                    state: generate_state()?,
                    nonce,
                }
            }
        };

        self.flow = Some(flow.clone());
        Ok(flow)
    }

    /// Store verified tokens and retire the flow that produced them
    pub fn authenticate(&mut self, tokens: TokenSet) {
        self.tokens = Some(SessionTokens {
            id_token: tokens.id_token,
            access_token: tokens.access_token,
        });
        self.flow = None;
    }

    /// Drop the login attempt in progress, so the next one starts with fresh
    /// PKCE material and state
    pub fn abandon_flow(&mut self) {
        self.flow = None;
    }

    /// Forget the tokens. The session itself stays.
    pub fn logout(&mut self) {
        self.tokens = None;
    }

    fn decode(value: &str) -> Option<Self> {
        match serde_json::from_str(value) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable session");
                None
            }
        }
    }
}

/// The request's session, written back to the cookie with [`Session::save`]
pub struct Session {
    data: AuthSession,
    jar: CookieJar,
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state).await?;

        let existing = jar
            .get(SESSION_COOKIE_NAME)
            .and_then(|value| AuthSession::decode(&value));

        let session = match existing {
            Some(data) => Session { data, jar },
            None => {
                if jar.is_present(SESSION_COOKIE_NAME) {
                    warn!("Session cookie could not be decrypted, starting over");
                }

                let session = Session {
                    data: AuthSession::new(),
                    jar,
                };
                info!(session = %session.id, "Created new session");
                session.save();
                session
            }
        };

        Ok(session)
    }
}

impl Session {
    pub fn save(&self) {
        match serde_json::to_string(&self.data) {
            Ok(value) => self.jar.set(SESSION_COOKIE_NAME, value, SESSION_MAX_AGE),
            Err(e) => error!(session = %self.data.id, error = %e, "Failed to encode session"),
        }
    }
}

impl Deref for Session {
    type Target = AuthSession;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}
