use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Failures of the authentication flow.
///
/// `Display` carries the detail meant for logs. What a browser gets to see is
/// [`AuthError::user_message`], which for token problems is deliberately vague.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    FlowState(#[from] FlowStateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("identity provider rejected the request: {error}: {description}")]
    ExchangeRejected { error: String, description: String },

    #[error("identity token rejected: {0}")]
    TokenInvalid(String),
}

/// The callback did not line up with the flow stored in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowStateError {
    #[error("The state was not as expected")]
    StateMismatch,

    #[error("The interaction_code was not returned or is not accessible")]
    MissingInteractionCode,

    #[error("Could not get PKCE Data from session")]
    MissingPkce,
}

/// Talking to the identity provider went wrong below the OAuth layer
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} responded with {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response from {endpoint}: {detail}")]
    Malformed { endpoint: String, detail: String },
}

impl ProviderError {
    pub(crate) fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        ProviderError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub(crate) fn malformed(endpoint: &str, detail: impl ToString) -> Self {
        ProviderError::Malformed {
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl AuthError {
    /// Message safe to show to the browser
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Configuration(_) => "The server is not configured correctly".to_string(),
            AuthError::FlowState(flow) => flow.to_string(),
            AuthError::Provider(_) => {
                "Could not reach the identity provider. Please try signing in again".to_string()
            }
            AuthError::ExchangeRejected { .. } => {
                "The identity provider rejected the sign-in attempt".to_string()
            }
            AuthError::TokenInvalid(_) => "The identity token could not be verified".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::FlowState(_) => StatusCode::BAD_REQUEST,
            AuthError::Provider(_) | AuthError::ExchangeRejected { .. } => StatusCode::BAD_GATEWAY,
            AuthError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::FlowState(_) => tracing::warn!(error = %self, "Rejected login callback"),
            _ => tracing::error!(error = %self, "Authentication failed"),
        }

        (self.status(), self.user_message()).into_response()
    }
}

#[derive(Debug)]
pub struct ServerError<R: IntoResponse>(pub(crate) color_eyre::Report, pub(crate) R);

pub type ServerResult<S, F = Response> = Result<S, ServerError<F>>;

impl<R: IntoResponse> IntoResponse for ServerError<R> {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = ?self.0, "Request Error");

        let is_dev_mode = std::env::var("DEVELOPMENT_MODE")
            .map(|v| v == "1")
            .unwrap_or(false);

        if is_dev_mode {
            let temp_response = self.1.into_response();
            if temp_response.status() == StatusCode::INTERNAL_SERVER_ERROR {
                let error_text = format!("{:?}", self.0);

                let error_html = maud::html! {
                    (maud::DOCTYPE)
                    html {
                        head { title { "Development Error - 500" } }
                        body style="font-family: monospace; margin: 20px;" {
                            h1 { "Development Mode - Internal Server Error" }
                            pre style="white-space: pre-wrap;" { (error_text) }
                        }
                    }
                };

                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html(error_html.into_string()),
                )
                    .into_response();
            }
            return temp_response;
        }

        self.1.into_response()
    }
}

impl<E> From<E> for ServerError<StatusCode>
where
    E: Into<color_eyre::Report>,
{
    fn from(err: E) -> Self {
        ServerError(err.into(), StatusCode::INTERNAL_SERVER_ERROR)
    }
}
