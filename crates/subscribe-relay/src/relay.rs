//! Two-hop subscription fetch.
//!
//! 1. Look up the one-time subscription URL on the authenticated API,
//!    refreshing the credential once if the upstream answers 401.
//! 2. Download that URL with the caller's own `User-Agent` and hand the
//!    response back unchanged.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use tracing::{error, info, warn};

use crate::auth::{Authenticator, UPSTREAM_USER_AGENT};
use crate::credential::Credential;
use crate::error::{snippet, RelayError};

const POINTER_TIMEOUT: Duration = Duration::from_secs(10);
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// A raw upstream response: status, content type and body bytes.
#[derive(Debug, Clone)]
pub struct RelayedPayload {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub body: Bytes,
}

impl RelayedPayload {
    async fn read(res: reqwest::Response) -> Result<Self, RelayError> {
        let status = res.status();
        let content_type = content_type_of(res.headers());
        let body = res.bytes().await?;
        Ok(Self {
            status,
            content_type,
            body,
        })
    }
}

impl IntoResponse for RelayedPayload {
    fn into_response(self) -> Response {
        (self.status, [(CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// Drives one `/get_subscribe` request against the upstream.
#[derive(Debug, Clone)]
pub struct SubscriptionRelay {
    http: reqwest::Client,
    authenticator: Authenticator,
}

impl SubscriptionRelay {
    pub fn new(http: reqwest::Client, authenticator: Authenticator) -> Self {
        Self {
            http,
            authenticator,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Fetch the subscription payload on behalf of a client identifying
    /// itself with `client_user_agent`.
    pub async fn fetch(&self, client_user_agent: &HeaderValue) -> Result<RelayedPayload, RelayError> {
        let credential = self.authenticator.ensure_credential(Utc::now()).await?;
        let subscribe_url = self.resolve_subscribe_url(credential).await?;

        info!(url = %subscribe_url, "requesting subscription content");
        let res = self
            .http
            .get(&subscribe_url)
            .header(USER_AGENT, client_user_agent.clone())
            .timeout(PAYLOAD_TIMEOUT)
            .send()
            .await?;

        RelayedPayload::read(res).await
    }

    /// Pointer fetch with at most one forced refresh. The response to the
    /// retried request is classified as-is, whatever its status.
    async fn resolve_subscribe_url(&self, credential: Credential) -> Result<String, RelayError> {
        let mut res = self.request_pointer(&credential).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            warn!("authorization rejected, refreshing token");
            let refreshed = self.authenticator.force_refresh(Utc::now()).await?;
            res = self.request_pointer(&refreshed).await?;
        }

        let pointer = RelayedPayload::read(res).await?;
        if pointer.status != StatusCode::OK {
            return Err(RelayError::Upstream {
                status: pointer.status,
                content_type: pointer.content_type,
                body: pointer.body,
            });
        }

        extract_subscribe_url(&pointer.body)
    }

    async fn request_pointer(&self, credential: &Credential) -> Result<reqwest::Response, RelayError> {
        let res = self
            .http
            .get(self.authenticator.upstream().subscribe_pointer_url())
            .header(USER_AGENT, UPSTREAM_USER_AGENT)
            .header(AUTHORIZATION, credential.value.as_str())
            .timeout(POINTER_TIMEOUT)
            .send()
            .await?;
        Ok(res)
    }
}

/// Read `data.subscribe_url` from a pointer response body.
fn extract_subscribe_url(body: &[u8]) -> Result<String, RelayError> {
    let json: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        error!(
            error = %e,
            body = %snippet(&String::from_utf8_lossy(body), 200),
            "subscription lookup returned invalid JSON"
        );
        RelayError::Internal(format!("invalid subscription lookup response: {e}"))
    })?;

    json.pointer("/data/subscribe_url")
        .and_then(|v| v.as_str())
        .filter(|url| !url.is_empty())
        .map(String::from)
        .ok_or(RelayError::NotFound)
}

fn content_type_of(headers: &HeaderMap) -> HeaderValue {
    headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/plain"))
}
