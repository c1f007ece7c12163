//! Subscription relay: logs in to an upstream panel once and serves the
//! account's subscription content to any client that asks.
//!
//! On each `GET /get_subscribe` the service:
//!
//! 1. Reuses (or obtains) the cached upstream authorization token.
//! 2. Asks the upstream for the one-time subscription URL, refreshing the
//!    token once if it is rejected.
//! 3. Downloads that URL with the caller's `User-Agent` and returns the
//!    response untouched.

mod auth;
mod config;
mod credential;
mod error;
mod relay;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use clap::Parser;
use tracing::{info, info_span, Instrument};

use crate::auth::{Authenticator, UPSTREAM_USER_AGENT};
use crate::config::AppConfig;
use crate::credential::CredentialCache;
use crate::error::{ConfigError, RelayError};
use crate::relay::{RelayedPayload, SubscriptionRelay};

/// Subscription relay server.
#[derive(Parser, Debug)]
#[command(name = "subscribe-relay", about = "Authenticated subscription relay")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    listen: SocketAddr,

    /// Start without logging in first; the token is obtained on the first request.
    #[arg(long)]
    skip_prefetch: bool,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all Axum handlers.
///
/// `relay` is only `None` for a router built without upstream configuration
/// (the binary itself refuses to start in that case); every subscription
/// request then fails with a configuration error.
struct AppState {
    relay: Option<SubscriptionRelay>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /test`: report the configured upstream base URL.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    match &state.relay {
        Some(relay) => (
            StatusCode::OK,
            format!(
                "service is running, upstream base url: {}",
                relay.authenticator().upstream().base_url
            ),
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "service misconfigured: API_BASE_URL is not set".to_string(),
        ),
    }
}

/// `GET /get_subscribe`: relay the subscription content.
async fn get_subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<RelayedPayload, RelayError> {
    let span = info_span!("get_subscribe", request_id = %uuid::Uuid::new_v4());

    async move {
        info!("subscription request received");
        let relay = state
            .relay
            .as_ref()
            .ok_or(ConfigError::Missing("API_BASE_URL"))?;

        let client_user_agent = headers
            .get(USER_AGENT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(UPSTREAM_USER_AGENT));

        let payload = relay.fetch(&client_user_agent).await?;
        info!(status = %payload.status, bytes = payload.body.len(), "subscription relayed");
        Ok::<_, RelayError>(payload)
    }
    .instrument(span)
    .await
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/get_subscribe", get(get_subscribe))
        .route("/test", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Args::parse(), |name| std::env::var(name).ok()).await
}

/// Validate configuration, obtain the first token and serve until shutdown.
///
/// Configuration and the initial login are checked before the listener is
/// bound, so a failure in either leaves the port untouched.
async fn run<F>(args: Args, lookup: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    info!("starting subscription relay");
    let config = AppConfig::from_lookup(lookup)
        .context("API_BASE_URL, API_EMAIL and API_PASSWORD must be set")?;
    info!(
        base_url = %config.upstream.base_url,
        expiry_secs = config.credential_expiry.num_seconds(),
        "upstream configured"
    );

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let cache = Arc::new(CredentialCache::new(config.credential_expiry));
    let authenticator = Authenticator::new(http.clone(), Arc::new(config.upstream), cache);

    if args.skip_prefetch {
        info!("skipping initial token fetch");
    } else {
        info!("fetching initial authorization token");
        authenticator
            .ensure_credential(Utc::now())
            .await
            .context("could not obtain initial token")?;
    }

    let state = Arc::new(AppState {
        relay: Some(SubscriptionRelay::new(http, authenticator)),
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    info!(address = %args.listen, "subscription relay listening");
    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
