use std::collections::HashMap;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use fixtures::idp::{IdpSettings, MockIdp, TokenBehavior};
use idx_login::{config::IdxConfig, routes, AppState};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt as _;
use tower_cookies::Key;

const SESSION_COOKIE: &str = "okta-self-hosted-session-store";

struct Page {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

/// Carries cookies between requests the way a browser would
struct Browser {
    app: Router,
    cookies: HashMap<String, String>,
}

impl Browser {
    fn new(app: Router) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
        }
    }

    async fn request(&mut self, method: Method, uri: &str) -> Page {
        let mut request = Request::builder().method(method).uri(uri);
        if !self.cookies.is_empty() {
            let cookie_header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(header::COOKIE, cookie_header);
        }

        let response = self
            .app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        for set_cookie in response.headers().get_all(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            self.cookies.insert(name.to_string(), value.to_string());
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        Page {
            status,
            headers,
            body: String::from_utf8(body.to_vec()).unwrap(),
        }
    }

    async fn get(&mut self, uri: &str) -> Page {
        self.request(Method::GET, uri).await
    }

    async fn post(&mut self, uri: &str) -> Page {
        self.request(Method::POST, uri).await
    }
}

fn bootstrap_of(page: &Page) -> Value {
    let start_tag = r#"<script id="siw-bootstrap" type="application/json">"#;
    let start = page.body.find(start_tag).expect("bootstrap script missing") + start_tag.len();
    let end = start + page.body[start..].find("</script>").unwrap();
    serde_json::from_str(&page.body[start..end]).unwrap()
}

fn config_for(idp: &MockIdp) -> IdxConfig {
    let settings = idp.settings();
    IdxConfig {
        client_id: settings.client_id,
        client_secret: settings.client_secret,
        issuer: idp.issuer().to_string(),
        scopes: vec!["openid".into(), "profile".into(), "email".into()],
        redirect_uri: "http://localhost:8080/login/callback".to_string(),
    }
}

async fn setup(settings: IdpSettings) -> (MockIdp, Browser) {
    let idp = MockIdp::spawn(settings).await.unwrap();
    let state = AppState::new(config_for(&idp), Key::generate(), false).unwrap();
    (idp, Browser::new(routes(state)))
}

/// Render the login page and sign in at the provider, returning the callback URI
/// alongside the widget bootstrap
async fn sign_in_at_provider(idp: &MockIdp, browser: &mut Browser) -> (Value, String) {
    let page = browser.get("/login").await;
    assert_eq!(page.status, StatusCode::OK);
    let bootstrap = bootstrap_of(&page);

    let handle = bootstrap["interactionHandle"].as_str().unwrap();
    let nonce = bootstrap["nonce"].as_str().unwrap();
    let code = idp.complete_interaction(handle, Some(nonce)).unwrap();
    let state = bootstrap["state"].as_str().unwrap();

    let callback = format!("/login/callback?interaction_code={code}&state={state}");
    (bootstrap, callback)
}

#[tokio::test]
async fn full_login_flow_authenticates_and_shows_profile() {
    let mut profile = Map::new();
    profile.insert("email".into(), json!("mary@example.com"));
    profile.insert("name".into(), json!("Mary Smith"));
    let (idp, mut browser) = setup(IdpSettings {
        profile,
        ..IdpSettings::default()
    })
    .await;

    let home = browser.get("/").await;
    assert_eq!(home.status, StatusCode::OK);
    assert!(home.body.contains(r#"href="/login""#));

    let login = browser.get("/login").await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.headers[header::CACHE_CONTROL], "no-cache");

    let bootstrap = bootstrap_of(&login);
    assert_eq!(bootstrap["isAuthenticated"], false);
    assert_eq!(bootstrap["baseUrl"], idp.base_url());
    assert_eq!(bootstrap["clientId"], "fixture-client");
    assert_eq!(bootstrap["issuer"], idp.issuer());
    assert_eq!(bootstrap["codeChallengeMethod"], "S256");
    assert_eq!(bootstrap["scopes"], json!(["openid", "profile", "email"]));

    let handle = bootstrap["interactionHandle"].as_str().unwrap();
    assert!(!handle.is_empty());
    let state = bootstrap["state"].as_str().unwrap();
    assert_eq!(idp.interaction_state(handle).as_deref(), Some(state));

    let interact = &idp.interact_requests()[0];
    assert_eq!(interact["scope"], "openid profile email");
    assert_eq!(interact["code_challenge"], bootstrap["codeChallenge"].as_str().unwrap());

    let code = idp
        .complete_interaction(handle, bootstrap["nonce"].as_str())
        .unwrap();
    let callback = browser
        .get(&format!("/login/callback?interaction_code={code}&state={state}"))
        .await;
    assert_eq!(callback.status, StatusCode::FOUND);
    assert_eq!(callback.headers[header::LOCATION], "/");

    // The verifier went to the token endpoint and only there
    let verifier = idp.token_requests()[0]["code_verifier"].clone();
    assert_eq!(
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        bootstrap["codeChallenge"].as_str().unwrap()
    );
    assert!(!login.body.contains(&verifier));

    let home = browser.get("/").await;
    assert!(home.body.contains("You are signed in."));
    assert!(home.body.contains("mary@example.com"));

    let profile = browser.get("/profile").await;
    assert_eq!(profile.status, StatusCode::OK);
    assert!(profile.body.contains("mary@example.com"));
    assert!(profile.body.contains("Mary Smith"));
}

#[tokio::test]
async fn session_cookie_is_private_and_scoped() {
    let (_idp, mut browser) = setup(IdpSettings::default()).await;

    let page = browser.get("/login").await;
    let set_cookie = page.headers[header::SET_COOKIE].to_str().unwrap();

    assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE}=")));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Path=/"));
    assert!(!set_cookie.contains("code_verifier"));
}

#[tokio::test]
async fn login_page_reuses_pending_flow_with_fresh_nonce() {
    let (_idp, mut browser) = setup(IdpSettings::default()).await;

    let first = bootstrap_of(&browser.get("/login").await);
    let second = bootstrap_of(&browser.get("/login").await);

    assert_eq!(first["codeChallenge"], second["codeChallenge"]);
    assert_eq!(first["state"], second["state"]);
    assert_ne!(first["nonce"], second["nonce"]);
    assert_ne!(first["interactionHandle"], second["interactionHandle"]);
}

#[tokio::test]
async fn home_page_shows_profile_once_signed_in() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    assert!(!browser.get("/").await.body.contains("fixture.user@example.com"));

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    assert_eq!(browser.get(&callback).await.status, StatusCode::FOUND);

    let home = browser.get("/").await;
    assert_eq!(home.status, StatusCode::OK);
    assert!(home.body.contains("fixture.user@example.com"));
    assert!(home.body.contains(r#"id="claim-name""#));
    assert!(home.body.contains("Fixture User"));
}

#[tokio::test]
async fn wrong_state_is_rejected_before_any_exchange() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    let (first, _) = sign_in_at_provider(&idp, &mut browser).await;

    let page = browser
        .get("/login/callback?interaction_code=abc123&state=ApplicationState")
        .await;

    assert_eq!(page.status, StatusCode::BAD_REQUEST);
    assert_eq!(page.body, "The state was not as expected");
    assert!(idp.token_requests().is_empty());

    let profile = browser.get("/profile").await;
    assert!(profile.body.contains("No profile information"));

    // A forged callback does not throw away the real pending flow
    let second = bootstrap_of(&browser.get("/login").await);
    assert_eq!(first["codeChallenge"], second["codeChallenge"]);
    assert_eq!(first["state"], second["state"]);
}

#[tokio::test]
async fn callback_without_login_has_no_pkce() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;

    let page = browser
        .get("/login/callback?interaction_code=abc123&state=anything")
        .await;

    assert_eq!(page.status, StatusCode::BAD_REQUEST);
    assert_eq!(page.body, "Could not get PKCE Data from session");
    assert!(idp.token_requests().is_empty());
}

#[tokio::test]
async fn missing_interaction_code_is_rejected() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    let (bootstrap, _) = sign_in_at_provider(&idp, &mut browser).await;
    let state = bootstrap["state"].as_str().unwrap();

    let page = browser
        .get(&format!("/login/callback?state={state}&interaction_code="))
        .await;

    assert_eq!(page.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        page.body,
        "The interaction_code was not returned or is not accessible"
    );

    let retry = bootstrap_of(&browser.get("/login").await);
    assert_ne!(retry["codeChallenge"], bootstrap["codeChallenge"]);
}

#[tokio::test]
async fn provider_error_in_callback_fails_the_flow() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    let (bootstrap, _) = sign_in_at_provider(&idp, &mut browser).await;
    let state = bootstrap["state"].as_str().unwrap();

    let page = browser
        .get(&format!(
            "/login/callback?state={state}&error=access_denied&error_description=nope"
        ))
        .await;

    assert_eq!(page.status, StatusCode::BAD_GATEWAY);
    assert!(idp.token_requests().is_empty());

    let retry = bootstrap_of(&browser.get("/login").await);
    assert_ne!(retry["codeChallenge"], bootstrap["codeChallenge"]);
}

#[tokio::test]
async fn token_error_spends_the_flow_and_retry_starts_fresh() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::Error {
        error: "invalid_grant".to_string(),
        description: "The interaction code is invalid".to_string(),
    });

    let (first, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;
    assert_eq!(page.status, StatusCode::BAD_GATEWAY);
    assert!(!page.body.contains("invalid_grant"));
    assert!(browser.get("/profile").await.body.contains("No profile information"));

    idp.set_token_behavior(TokenBehavior::Issue);
    let (second, callback) = sign_in_at_provider(&idp, &mut browser).await;
    assert_ne!(first["codeChallenge"], second["codeChallenge"]);
    assert_ne!(first["state"], second["state"]);

    let page = browser.get(&callback).await;
    assert_eq!(page.status, StatusCode::FOUND);

    let requests = idp.token_requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0]["code_verifier"], requests[1]["code_verifier"]);
    assert!(browser.get("/profile").await.body.contains("fixture.user@example.com"));
}

#[tokio::test]
async fn error_field_with_tokens_is_still_a_failure() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::ErrorWithTokens {
        error: "server_error".to_string(),
    });

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;

    assert_eq!(page.status, StatusCode::BAD_GATEWAY);
    assert!(browser.get("/profile").await.body.contains("No profile information"));
}

#[tokio::test]
async fn token_endpoint_failure_is_a_provider_error() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::ServerError);

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;

    assert_eq!(page.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn token_signed_by_unknown_key_does_not_authenticate() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::UnpublishedKey);

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;

    assert_eq!(page.status, StatusCode::UNAUTHORIZED);
    assert_eq!(page.body, "The identity token could not be verified");
    assert!(browser.get("/profile").await.body.contains("No profile information"));

    // Replaying the same callback finds nothing left to complete
    let replay = browser.get(&callback).await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
    assert_eq!(replay.body, "Could not get PKCE Data from session");
    assert_eq!(idp.token_requests().len(), 1);
}

#[tokio::test]
async fn token_for_another_client_does_not_authenticate() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::WrongAudience);

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;

    assert_eq!(page.status, StatusCode::UNAUTHORIZED);
    assert!(!page.body.contains("aud"));
}

#[tokio::test]
async fn stale_nonce_does_not_authenticate() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;

    let bootstrap = bootstrap_of(&browser.get("/login").await);
    let handle = bootstrap["interactionHandle"].as_str().unwrap();
    let state = bootstrap["state"].as_str().unwrap();
    let code = idp
        .complete_interaction(handle, Some("a-nonce-from-another-render"))
        .unwrap();

    let page = browser
        .get(&format!("/login/callback?interaction_code={code}&state={state}"))
        .await;

    assert_eq!(page.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_without_nonce_is_accepted() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_token_behavior(TokenBehavior::OmitNonce);

    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    let page = browser.get(&callback).await;

    assert_eq!(page.status, StatusCode::FOUND);
}

#[tokio::test]
async fn logout_clears_authentication() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    let (_, callback) = sign_in_at_provider(&idp, &mut browser).await;
    assert_eq!(browser.get(&callback).await.status, StatusCode::FOUND);
    assert!(browser.get("/profile").await.body.contains("fixture.user@example.com"));

    let page = browser.post("/logout").await;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.headers[header::LOCATION], "/");

    let profile = browser.get("/profile").await;
    assert!(profile.body.contains("No profile information"));
    assert!(browser.get("/").await.body.contains(r#"href="/login""#));
}

#[tokio::test]
async fn logout_requires_post() {
    let (_idp, mut browser) = setup(IdpSettings::default()).await;

    let page = browser.get("/logout").await;

    assert_eq!(page.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn login_page_renders_when_provider_is_down() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;
    idp.set_interact_available(false);

    let page = browser.get("/login").await;

    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(bootstrap_of(&page)["interactionHandle"], "");
}

#[tokio::test]
async fn tampered_cookie_starts_a_fresh_session() {
    let (_idp, mut browser) = setup(IdpSettings::default()).await;
    browser
        .cookies
        .insert(SESSION_COOKIE.to_string(), "bm90LWVuY3J5cHRlZA".to_string());

    let page = browser.get("/profile").await;

    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("No profile information"));
    assert!(page.headers.contains_key(header::SET_COOKIE));
}

#[tokio::test]
async fn profile_without_session_makes_no_provider_call() {
    let (idp, mut browser) = setup(IdpSettings::default()).await;

    let page = browser.get("/profile").await;

    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("No profile information"));
    assert_eq!(idp.key_fetches(), 0);
    assert!(idp.token_requests().is_empty());
}
