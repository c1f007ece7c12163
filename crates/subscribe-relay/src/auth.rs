//! Upstream login exchange.
//!
//! [`Authenticator`] owns the shared [`CredentialCache`] and logs in to the
//! upstream panel whenever the cached token is missing, stale or rejected.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::UpstreamConfig;
use crate::credential::{Credential, CredentialCache, TOKEN_LOG_PREFIX};
use crate::error::{snippet, AuthError};

/// User-agent presented to the upstream API on login and pointer fetches.
pub const UPSTREAM_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36 Edg/140.0.0.0";

const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Obtains and caches the upstream authorization token.
#[derive(Debug, Clone)]
pub struct Authenticator {
    http: reqwest::Client,
    upstream: Arc<UpstreamConfig>,
    cache: Arc<CredentialCache>,
}

impl Authenticator {
    pub fn new(
        http: reqwest::Client,
        upstream: Arc<UpstreamConfig>,
        cache: Arc<CredentialCache>,
    ) -> Self {
        Self {
            http,
            upstream,
            cache,
        }
    }

    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// Return the cached credential, logging in first if it is stale.
    pub async fn ensure_credential(&self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        // A refresh racing between the two reads only yields a newer token.
        if !self.cache.is_stale(now) {
            if let Some(credential) = self.cache.get() {
                debug!("using cached credential");
                return Ok(credential);
            }
        }
        self.login(now).await
    }

    /// Log in regardless of the cached credential's age.
    ///
    /// Used after the upstream rejected the current token.
    pub async fn force_refresh(&self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        self.login(now).await
    }

    async fn login(&self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        info!(base_url = %self.upstream.base_url, "requesting new authorization token");

        let res = self
            .http
            .post(self.upstream.login_url())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, UPSTREAM_USER_AGENT)
            .json(&LoginRequest {
                email: &self.upstream.email,
                password: &self.upstream.password,
            })
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await?;

        let status = res.status();
        if status != StatusCode::OK {
            let text = res.text().await.unwrap_or_default();
            let body = snippet(&text, 200).to_string();
            error!(%status, %body, "login failed");
            return Err(AuthError::LoginFailed { status, body });
        }

        let body: serde_json::Value = res.json().await?;
        let token = body
            .pointer("/data/auth_data")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                error!("auth_data missing from login response");
                AuthError::TokenMissing
            })?;

        let credential = self.cache.set(token, now);
        info!(
            token_prefix = %credential.prefix(TOKEN_LOG_PREFIX),
            "obtained new authorization token"
        );
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn authenticator_for(server: &MockServer) -> Authenticator {
        let upstream = UpstreamConfig {
            base_url: server.base_url(),
            email: "me@example.com".into(),
            password: "hunter2".into(),
        };
        Authenticator::new(
            reqwest::Client::new(),
            Arc::new(upstream),
            Arc::new(CredentialCache::new(TimeDelta::seconds(3600))),
        )
    }

    #[tokio::test]
    async fn login_caches_token() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/passport/auth/login")
                    .header("content-type", "application/json")
                    .header("user-agent", UPSTREAM_USER_AGENT)
                    .json_body(json!({"email": "me@example.com", "password": "hunter2"}));
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": {"auth_data": "tok123"}}));
            })
            .await;

        let auth = authenticator_for(&server);
        let now = Utc::now();
        let credential = auth.ensure_credential(now).await.unwrap();

        assert_eq!(credential.value, "tok123");
        assert_eq!(credential.acquired_at, now);
        assert_eq!(auth.cache.get().unwrap().value, "tok123");
        login.assert_async().await;
    }

    #[tokio::test]
    async fn ensure_credential_logs_in_once_within_window() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(200)
                    .json_body(json!({"data": {"auth_data": "tok123"}}));
            })
            .await;

        let auth = authenticator_for(&server);
        let now = Utc::now();
        let first = auth.ensure_credential(now).await.unwrap();
        let second = auth
            .ensure_credential(now + TimeDelta::seconds(60))
            .await
            .unwrap();

        assert_eq!(first, second);
        login.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn stale_credential_triggers_new_login() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(200)
                    .json_body(json!({"data": {"auth_data": "tok456"}}));
            })
            .await;

        let auth = authenticator_for(&server);
        let t0 = Utc::now();
        auth.cache.set("tok123", t0);

        let credential = auth
            .ensure_credential(t0 + TimeDelta::seconds(3600))
            .await
            .unwrap();
        assert_eq!(credential.value, "tok456");
        login.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn force_refresh_ignores_fresh_cache() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(200)
                    .json_body(json!({"data": {"auth_data": "tok456"}}));
            })
            .await;

        let auth = authenticator_for(&server);
        let now = Utc::now();
        auth.cache.set("tok123", now);

        let credential = auth.force_refresh(now).await.unwrap();
        assert_eq!(credential.value, "tok456");
        assert_eq!(auth.cache.get().unwrap().value, "tok456");
        login.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn non_200_login_is_not_cached() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(422).body("invalid credentials");
            })
            .await;

        let auth = authenticator_for(&server);
        let err = auth.ensure_credential(Utc::now()).await.unwrap_err();

        match err {
            AuthError::LoginFailed { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body, "invalid credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(auth.cache.get().is_none());
    }

    #[tokio::test]
    async fn login_failure_body_is_truncated() {
        let server = MockServer::start_async().await;
        let long_body = "x".repeat(500);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(500).body(&long_body);
            })
            .await;

        let auth = authenticator_for(&server);
        let err = auth.ensure_credential(Utc::now()).await.unwrap_err();
        let AuthError::LoginFailed { body, .. } = err else {
            panic!("expected LoginFailed");
        };
        assert_eq!(body.len(), 200);
    }

    #[tokio::test]
    async fn missing_auth_data_is_token_missing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/passport/auth/login");
                then.status(200).json_body(json!({"data": {}}));
            })
            .await;

        let auth = authenticator_for(&server);
        let err = auth.ensure_credential(Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenMissing));
        assert!(auth.cache.get().is_none());
    }
}
