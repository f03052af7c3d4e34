use std::collections::BTreeMap;

use axum::extract::State;
use maud::html;

use crate::{
    auth::Session,
    components::{
        layout::{Card, Page},
        profile::ProfileClaims,
    },
    oauth::userinfo,
    state::AppState,
};

/// Profile attributes for an authenticated session, empty otherwise
pub(crate) async fn profile_for(
    state: &AppState,
    session: &Session,
) -> BTreeMap<String, String> {
    match session.access_token() {
        Some(access_token) if session.is_authenticated() => {
            userinfo::fetch_profile(&state.http, &state.endpoints, access_token).await
        }
        _ => BTreeMap::new(),
    }
}

/// The user's attributes as the identity provider reports them
pub async fn profile_page(State(state): State<AppState>, session: Session) -> Page {
    let profile = profile_for(&state, &session).await;

    let content = html! {
        h1 class="text-2xl font-bold text-gray-900 mb-4" { "My Profile" }
        @if !profile.is_empty() {
            p class="text-gray-600 mb-4" {
                "These are the attributes the identity provider returned for your account."
            }
        }
        (ProfileClaims::new(&profile))
    };

    Page::new("My Profile", session.is_authenticated(), Card::new(content))
}
