//! In-process identity provider speaking the interaction-code flow.
//!
//! Serves the interact, token, user-info, key set and discovery endpoints
//! with fixed ES256 keys, and lets tests complete an interaction the way the
//! sign-in widget would.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::keys::{id_token_claims, FixtureKey};

/// Who the provider thinks it is talking to, and who signs in
#[derive(Debug, Clone)]
pub struct IdpSettings {
    pub client_id: String,
    pub client_secret: String,
    pub subject: String,
    /// Claims served from the user-info endpoint next to `sub`
    pub profile: Map<String, Value>,
    pub serve_discovery: bool,
}

impl Default for IdpSettings {
    fn default() -> Self {
        let mut profile = Map::new();
        profile.insert("name".into(), json!("Fixture User"));
        profile.insert("email".into(), json!("fixture.user@example.com"));
        profile.insert("email_verified".into(), json!(true));
        profile.insert("zoneinfo".into(), json!("America/Los_Angeles"));
        profile.insert("updated_at".into(), json!(1_700_000_000));
        profile.insert("groups".into(), json!(["Everyone"]));

        Self {
            client_id: "fixture-client".to_string(),
            client_secret: "fixture-secret".to_string(),
            subject: "00u1fixtureuser".to_string(),
            profile,
            serve_discovery: true,
        }
    }
}

/// How the token endpoint answers a valid exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBehavior {
    Issue,
    /// 400 with an OAuth error payload
    Error { error: String, description: String },
    /// 200 with an error payload alongside a full token set
    ErrorWithTokens { error: String },
    /// Sign the ID token with a key the key set never publishes
    UnpublishedKey,
    WrongAudience,
    OmitNonce,
    ServerError,
}

#[derive(Debug, Clone)]
struct Interaction {
    code_challenge: String,
    state: String,
}

#[derive(Debug, Clone)]
struct PendingCode {
    code_challenge: String,
    nonce: Option<String>,
}

struct Inner {
    settings: IdpSettings,
    base_url: String,
    published: Vec<FixtureKey>,
    signing: FixtureKey,
    unpublished: FixtureKey,
    behavior: TokenBehavior,
    interact_available: bool,
    interactions: HashMap<String, Interaction>,
    codes: HashMap<String, PendingCode>,
    access_tokens: HashSet<String>,
    interact_requests: Vec<HashMap<String, String>>,
    token_requests: Vec<HashMap<String, String>>,
    key_fetches: usize,
}

#[derive(Clone)]
pub struct IdpState(Arc<Mutex<Inner>>);

impl IdpState {
    pub fn new(settings: IdpSettings, base_url: String) -> anyhow::Result<Self> {
        let primary = FixtureKey::primary()?;

        Ok(Self(Arc::new(Mutex::new(Inner {
            settings,
            base_url,
            published: vec![primary.clone()],
            signing: primary,
            unpublished: FixtureKey::unpublished()?,
            behavior: TokenBehavior::Issue,
            interact_available: true,
            interactions: HashMap::new(),
            codes: HashMap::new(),
            access_tokens: HashSet::new(),
            interact_requests: Vec::new(),
            token_requests: Vec::new(),
            key_fetches: 0,
        }))))
    }

    fn complete_interaction(&self, handle: &str, nonce: Option<&str>) -> Option<String> {
        let mut inner = self.inner();
        let interaction = inner.interactions.remove(handle)?;

        let code = Uuid::new_v4().simple().to_string();
        inner.codes.insert(
            code.clone(),
            PendingCode {
                code_challenge: interaction.code_challenge,
                nonce: nonce.map(str::to_string),
            },
        );

        Some(code)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn router(state: IdpState) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/oauth2/v1/interact", post(interact))
        .route("/oauth2/v1/token", post(token))
        .route("/oauth2/v1/userinfo", get(userinfo))
        .route("/oauth2/v1/keys", get(keys))
        .route("/fixture/complete", get(complete))
        .with_state(state)
}

/// A provider bound to an ephemeral localhost port for the life of the value
pub struct MockIdp {
    state: IdpState,
    base_url: String,
    server: JoinHandle<()>,
}

impl MockIdp {
    pub async fn spawn(settings: IdpSettings) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let state = IdpState::new(settings, base_url.clone())?;
        let app = router(state.clone());

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Fixture identity provider stopped: {e}");
            }
        });

        Ok(Self {
            state,
            base_url,
            server,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issuer the ID tokens carry, which is the base URL
    pub fn issuer(&self) -> &str {
        &self.base_url
    }

    pub fn settings(&self) -> IdpSettings {
        self.state.inner().settings.clone()
    }

    /// Finish an interaction as the widget would after the user signs in,
    /// returning the one-time interaction code
    pub fn complete_interaction(&self, handle: &str, nonce: Option<&str>) -> Option<String> {
        self.state.complete_interaction(handle, nonce)
    }

    /// The state the client sent when it opened this interaction
    pub fn interaction_state(&self, handle: &str) -> Option<String> {
        self.state
            .inner()
            .interactions
            .get(handle)
            .map(|i| i.state.clone())
    }

    pub fn sign(&self, claims: &Value) -> anyhow::Result<String> {
        self.state.inner().signing.sign(claims)
    }

    pub fn sign_with_unpublished_key(&self, claims: &Value) -> anyhow::Result<String> {
        self.state.inner().unpublished.sign(claims)
    }

    /// Publish only the rotated key and sign with it from now on
    pub fn rotate_keys(&self) -> anyhow::Result<()> {
        let rotated = FixtureKey::rotated()?;
        let mut inner = self.state.inner();
        inner.published = vec![rotated.clone()];
        inner.signing = rotated;
        Ok(())
    }

    pub fn set_token_behavior(&self, behavior: TokenBehavior) {
        self.state.inner().behavior = behavior;
    }

    pub fn set_interact_available(&self, available: bool) {
        self.state.inner().interact_available = available;
    }

    pub fn interact_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.inner().interact_requests.clone()
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.inner().token_requests.clone()
    }

    pub fn key_fetches(&self) -> usize {
        self.state.inner().key_fetches
    }

    /// Mint an access token the user-info endpoint will accept
    pub fn issue_access_token(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.state.inner().access_tokens.insert(token.clone());
        token
    }
}

impl Drop for MockIdp {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

/// Stand-in for the widget when running the fixture by hand
async fn complete(
    State(state): State<IdpState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let handle = params.get("interaction_handle").map(String::as_str).unwrap_or_default();
    let nonce = params.get("nonce").map(String::as_str);

    match state.complete_interaction(handle, nonce) {
        Some(code) => Json(json!({ "interaction_code": code })).into_response(),
        None => oauth_error(
            StatusCode::NOT_FOUND,
            "invalid_request",
            "Unknown interaction handle",
        ),
    }
}

async fn discovery(State(state): State<IdpState>) -> Response {
    let inner = state.inner();
    if !inner.settings.serve_discovery {
        return StatusCode::NOT_FOUND.into_response();
    }

    let base = &inner.base_url;
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth2/v1/authorize"),
        "token_endpoint": format!("{base}/oauth2/v1/token"),
        "userinfo_endpoint": format!("{base}/oauth2/v1/userinfo"),
        "jwks_uri": format!("{base}/oauth2/v1/keys"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["ES256"],
        "grant_types_supported": ["authorization_code", "interaction_code"],
        "code_challenge_methods_supported": ["S256"],
    }))
    .into_response()
}

async fn interact(
    State(state): State<IdpState>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let mut inner = state.inner();
    inner.interact_requests.push(params.clone());

    if !inner.interact_available {
        return (StatusCode::SERVICE_UNAVAILABLE, "interact unavailable").into_response();
    }

    if params.get("client_id") != Some(&inner.settings.client_id) {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "Client authentication failed",
        );
    }

    let required = ["scope", "code_challenge", "redirect_uri", "state"];
    if let Some(missing) = required
        .iter()
        .find(|name| params.get(**name).map_or(true, |v| v.is_empty()))
    {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &format!("Missing parameter: {missing}"),
        );
    }

    if params.get("code_challenge_method").map(String::as_str) != Some("S256") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Unsupported code_challenge_method",
        );
    }

    let handle = Uuid::new_v4().simple().to_string();
    inner.interactions.insert(
        handle.clone(),
        Interaction {
            code_challenge: params["code_challenge"].clone(),
            state: params["state"].clone(),
        },
    );
    info!("IdP: opened interaction {handle}");

    Json(json!({ "interaction_handle": handle })).into_response()
}

async fn token(
    State(state): State<IdpState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = state.inner();
    inner.token_requests.push(params.clone());

    if inner.behavior == TokenBehavior::ServerError {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    if params.get("grant_type").map(String::as_str) != Some("interaction_code") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "The grant type is not supported",
        );
    }

    if params.get("client_id") != Some(&inner.settings.client_id)
        || params.get("client_secret") != Some(&inner.settings.client_secret)
    {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "Client authentication failed",
        );
    }

    let Some(pending) = params
        .get("interaction_code")
        .and_then(|code| inner.codes.remove(code))
    else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "The interaction code is invalid or has expired",
        );
    };

    let verifier = params.get("code_verifier").cloned().unwrap_or_default();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    if challenge != pending.code_challenge {
        warn!("IdP: PKCE verification failed");
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "PKCE verification failed",
        );
    }

    if let TokenBehavior::Error { error, description } = &inner.behavior {
        return oauth_error(StatusCode::BAD_REQUEST, error, description);
    }

    let audience = if inner.behavior == TokenBehavior::WrongAudience {
        "some-other-client".to_string()
    } else {
        inner.settings.client_id.clone()
    };
    let nonce = if inner.behavior == TokenBehavior::OmitNonce {
        None
    } else {
        pending.nonce.as_deref()
    };

    let mut claims = id_token_claims(&inner.base_url, &audience, &inner.settings.subject, nonce);
    for field in ["name", "email"] {
        if let Some(value) = inner.settings.profile.get(field) {
            claims[field] = value.clone();
        }
    }

    let signer = if inner.behavior == TokenBehavior::UnpublishedKey {
        &inner.unpublished
    } else {
        &inner.signing
    };
    let id_token = match signer.sign(&claims) {
        Ok(token) => token,
        Err(e) => {
            error!("IdP: failed to sign ID token: {e:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let access_token = Uuid::new_v4().simple().to_string();
    inner.access_tokens.insert(access_token.clone());

    let mut body = json!({
        "token_type": "Bearer",
        "expires_in": 3600,
        "access_token": access_token,
        "scope": "openid profile email",
        "id_token": id_token,
    });
    if let TokenBehavior::ErrorWithTokens { error } = &inner.behavior {
        body["error"] = json!(error);
    }

    Json(body).into_response()
}

async fn userinfo(State(state): State<IdpState>, headers: HeaderMap) -> Response {
    let inner = state.inner();

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match bearer {
        Some(token) if inner.access_tokens.contains(token) => {
            let mut body = inner.settings.profile.clone();
            body.insert("sub".into(), json!(inner.settings.subject));
            Json(Value::Object(body)).into_response()
        }
        _ => oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "The access token is invalid",
        ),
    }
}

async fn keys(State(state): State<IdpState>) -> Response {
    let mut inner = state.inner();
    inner.key_fetches += 1;

    let keys: Vec<Value> = inner.published.iter().map(|k| k.jwk().clone()).collect();
    Json(json!({ "keys": keys })).into_response()
}
