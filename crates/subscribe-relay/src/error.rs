//! Error types for the subscription relay.
//!
//! [`RelayError`] unifies all per-request failure modes and implements
//! [`axum::response::IntoResponse`] so handlers can return
//! `Result<…, RelayError>` directly.

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Missing or malformed configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset in both its plain and `_FILE` form.
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

/// Failures of the upstream login exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The login endpoint answered with a non-200 status.
    #[error("login failed: {status} - {body}")]
    LoginFailed { status: StatusCode, body: String },

    /// The login response had no `data.auth_data` field.
    #[error("token missing in response")]
    TokenMissing,

    /// Transport failure or unreadable response body.
    #[error("failed to reach upstream: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors that terminate a `/get_subscribe` request.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The pointer fetch returned something other than 200 or a first 401.
    /// The upstream body is forwarded to the caller untouched.
    #[error("subscription lookup returned {status}")]
    Upstream {
        status: StatusCode,
        content_type: HeaderValue,
        body: Bytes,
    },

    #[error("subscribe url not found")]
    NotFound,

    #[error("upstream request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Upstream {
                status: upstream_status,
                content_type,
                body,
            } => {
                error!(
                    upstream_status = %upstream_status,
                    body = %snippet(&String::from_utf8_lossy(body), 200),
                    "subscription lookup failed"
                );
                return (
                    StatusCode::BAD_GATEWAY,
                    [(CONTENT_TYPE, content_type.clone())],
                    body.clone(),
                )
                    .into_response();
            }
            Self::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream base url is not configured",
            ),
            Self::Auth(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "unable to obtain authorization token",
            ),
            Self::NotFound => (StatusCode::NOT_FOUND, "subscribe url not found"),
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "upstream request timed out"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
        };

        error!(%status, error = %self, "request failed");
        (
            status,
            Json(json!({ "status": "error", "message": message })),
        )
            .into_response()
    }
}

/// The first `max` characters of `text`.
pub fn snippet(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
