use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use maud::html;
use tower_cookies::CookieManagerLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    auth::Session,
    components::{
        layout::{Card, Page},
        profile::ProfileClaims,
    },
    state::AppState,
};

pub mod callback;
pub mod login;
pub mod profile;

/// Longest a single request may take, provider calls included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the application router with all routes
pub fn routes(app_state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(home_page))
        .route("/login", get(login::login_page))
        .route("/login/callback", get(callback::login_callback))
        .route("/profile", get(profile::profile_page))
        .route("/logout", post(logout))
        .layer(CookieManagerLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(sentry_tower::SentryHttpLayer::with_transaction())
        .layer(sentry_tower::NewSentryLayer::<Request>::new_from_top())
        .with_state(app_state)
}

async fn home_page(State(state): State<AppState>, session: Session) -> Page {
    let authenticated = session.is_authenticated();
    let profile = profile::profile_for(&state, &session).await;

    let content = html! {
        h1 class="text-3xl font-bold text-gray-900 mb-4" { "Embedded Sign-In Widget" }
        @if authenticated {
            p class="text-gray-700 mb-4" { "You are signed in." }
            div class="mb-4" { (ProfileClaims::new(&profile)) }
            a href="/profile" class="inline-block bg-indigo-600 text-white rounded-lg px-4 py-2" {
                "View my profile"
            }
        } @else {
            p class="text-gray-700 mb-4" {
                "Sign in through the embedded widget backed by " (state.config.issuer) "."
            }
            a href="/login" class="inline-block bg-indigo-600 text-white rounded-lg px-4 py-2" {
                "Login"
            }
        }
    };

    Page::new("Home", authenticated, Card::new(content))
}

async fn logout(mut session: Session) -> Response {
    session.logout();
    session.save();
    info!(session = %session.id, "Logged out");

    found("/")
}

/// Plain `302 Found`
pub(crate) fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
