use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse as _, Response},
};
use time::Duration;
use tower_cookies::{cookie::SameSite, Cookie, Cookies, Key};
use tracing::error;

use crate::state::AppState;

/// Private (encrypted and authenticated) view over the request's cookies
pub struct CookieJar {
    cookies: Cookies,
    key: Key,
    secure: bool,
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for CookieJar {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = match Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies,
            Err(_) => {
                error!("Failed to extract cookies from request, is the cookie layer missing?");
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };

        Ok(CookieJar {
            cookies,
            key: state.cookie_key.clone(),
            secure: state.secure_cookies,
        })
    }
}

impl CookieJar {
    /// Value of a private cookie. `None` when it is absent or fails to decrypt.
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies
            .private(&self.key)
            .get(name)
            .map(|cookie| cookie.value().to_string())
    }

    /// Whether the browser sent a cookie of this name at all
    pub fn is_present(&self, name: &str) -> bool {
        self.cookies.get(name).is_some()
    }

    /// Set a private cookie with the session attributes
    pub fn set(&self, name: &'static str, value: String, max_age: Duration) {
        let mut cookie = Cookie::new(name, value);
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_secure(self.secure);
        cookie.set_max_age(max_age);

        self.cookies.private(&self.key).add(cookie);
    }
}
