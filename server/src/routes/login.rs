use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use maud::{html, Markup, PreEscaped};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    auth::Session,
    components::layout::{Card, Page},
    errors::ServerResult,
    oauth::{interact, InteractionHandle},
    state::AppState,
};

const WIDGET_VERSION: &str = "7.14.0";

/// Everything the sign-in widget needs to pick up the flow.
///
/// Never carries the PKCE verifier.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetBootstrap<'a> {
    pub is_authenticated: bool,
    pub base_url: &'a str,
    pub client_id: &'a str,
    pub issuer: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    pub nonce: &'a str,
    pub interaction_handle: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'static str,
}

/// JSON that can sit inside a `<script>` element without closing it early
pub fn script_safe_json(value: &impl Serialize) -> serde_json::Result<String> {
    Ok(serde_json::to_string(value)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}

pub async fn login_page(
    State(state): State<AppState>,
    mut session: Session,
) -> ServerResult<Response, StatusCode> {
    let flow = session.prepare_flow()?;
    session.save();

    let handle = match interact::initiate(
        &state.http,
        &state.endpoints,
        &state.config,
        &flow.pkce,
        &flow.state,
    )
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Could not get an interaction handle");
            InteractionHandle::default()
        }
    };

    let bootstrap = WidgetBootstrap {
        is_authenticated: session.is_authenticated(),
        base_url: &state.endpoints.base_url,
        client_id: &state.config.client_id,
        issuer: &state.config.issuer,
        redirect_uri: &state.config.redirect_uri,
        scopes: &state.config.scopes,
        state: &flow.state,
        nonce: &flow.nonce,
        interaction_handle: handle.as_str(),
        code_challenge: &flow.pkce.code_challenge,
        code_challenge_method: flow.pkce.code_challenge_method.as_str(),
    };
    let bootstrap = script_safe_json(&bootstrap)?;

    info!(session = %session.id, has_handle = !handle.is_empty(), "Rendering login page");

    let page = Page::new(
        "Login",
        session.is_authenticated(),
        Card::new(login_content(bootstrap)),
    )
    .with_head(widget_assets());

    Ok(([(header::CACHE_CONTROL, "no-cache")], page).into_response())
}

fn widget_assets() -> Markup {
    html! {
        script src={"https://global.oktacdn.com/okta-signin-widget/" (WIDGET_VERSION) "/js/okta-sign-in.min.js"} type="text/javascript" {}
        link href={"https://global.oktacdn.com/okta-signin-widget/" (WIDGET_VERSION) "/css/okta-sign-in.min.css"} type="text/css" rel="stylesheet";
    }
}

fn login_content(bootstrap: String) -> Markup {
    html! {
        div id="okta-signin-widget-container" {}
        script id="siw-bootstrap" type="application/json" { (PreEscaped(bootstrap)) }
        script type="text/javascript" {
            (PreEscaped(r#"
const data = JSON.parse(document.getElementById('siw-bootstrap').textContent);
const signIn = new OktaSignIn({
  baseUrl: data.baseUrl,
  clientId: data.clientId,
  redirectUri: data.redirectUri,
  useInteractionCodeFlow: true,
  interactionHandle: data.interactionHandle,
  codeChallenge: data.codeChallenge,
  codeChallengeMethod: data.codeChallengeMethod,
  state: data.state,
  authParams: {
    issuer: data.issuer,
    scopes: data.scopes,
    nonce: data.nonce,
    pkce: true,
  },
});
signIn.showSignInAndRedirect({ el: '#okta-signin-widget-container' })
  .catch(function (err) { console.error(err); });
"#))
        }
    }
}
