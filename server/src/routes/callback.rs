use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::{PendingFlow, Session},
    errors::{AuthError, FlowStateError},
    oauth::{token, utils::constant_time_eq, TokenSet},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub interaction_code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where the widget sends the browser once the user has signed in.
///
/// Only a fully verified token pair authenticates the session. Once the
/// state has matched, the pending flow is spent whatever the outcome; a
/// callback with the wrong state leaves it alone.
pub async fn login_callback(
    State(state): State<AppState>,
    mut session: Session,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(flow) = session.flow.clone() else {
        return AuthError::from(FlowStateError::MissingPkce).into_response();
    };

    if !flow.is_usable() {
        warn!(session = %session.id, "Stored login flow is incomplete, discarding it");
        session.abandon_flow();
        session.save();
        return AuthError::from(FlowStateError::MissingPkce).into_response();
    }

    match complete_login(&state, &flow, params).await {
        Ok(tokens) => {
            session.authenticate(tokens);
            session.save();
            info!(session = %session.id, "Login complete");
            super::found("/")
        }
        Err(e) => {
            if !matches!(e, AuthError::FlowState(FlowStateError::StateMismatch)) {
                session.abandon_flow();
                session.save();
            }
            e.into_response()
        }
    }
}

async fn complete_login(
    state: &AppState,
    flow: &PendingFlow,
    params: CallbackParams,
) -> Result<TokenSet, AuthError> {
    let state_matches = params
        .state
        .as_deref()
        .is_some_and(|returned| constant_time_eq(returned, &flow.state));
    if !state_matches {
        return Err(FlowStateError::StateMismatch.into());
    }

    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        warn!(%error, "Identity provider returned an error to the callback");
        return Err(AuthError::ExchangeRejected {
            error,
            description: params.error_description.unwrap_or_default(),
        });
    }

    let interaction_code = params
        .interaction_code
        .filter(|code| !code.is_empty())
        .ok_or(FlowStateError::MissingInteractionCode)?;

    let tokens = token::exchange(
        &state.http,
        &state.endpoints,
        &state.config,
        &interaction_code,
        &flow.pkce.code_verifier,
    )
    .await?;

    let claims = state
        .verifier
        .verify(
            &tokens.id_token,
            &state.config.client_id,
            &state.config.issuer,
            Some(&flow.nonce),
        )
        .await?;
    info!(sub = %claims.sub, "Identity token accepted");

    Ok(tokens)
}
