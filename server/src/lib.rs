//! Backend for an embedded sign-in widget.
//!
//! The widget collects credentials in the browser; this crate owns the
//! interaction-code flow around it: PKCE and nonce generation, the
//! interaction handle, the token exchange, identity token verification and
//! the cookie session that records the outcome.

pub mod auth;
pub mod components;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod oauth;
pub mod routes;
pub mod setup;
pub mod state;

pub use routes::routes;
pub use state::AppState;
