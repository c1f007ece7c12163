//! Relay configuration.
//!
//! Every upstream setting is read from an environment variable or, when that
//! is unset, from the file named by the companion `<NAME>_FILE` variable. The
//! resulting [`AppConfig`] is built once at startup and shared through
//! [`axum::extract::State`].

use std::fmt;

use chrono::TimeDelta;
use tracing::error;

use crate::error::ConfigError;

/// Default credential expiry, in seconds.
///
/// The value is roughly 41.7 days although it has historically been
/// described as "one hour". Override with `CREDENTIAL_EXPIRY_SECS`.
pub const DEFAULT_CREDENTIAL_EXPIRY_SECS: i64 = 3_600_000;

/// Upstream API location and account.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// Base URL without trailing slash (e.g. `https://panel.example.com`).
    pub base_url: String,
    /// Account identifier sent as `email` on login.
    pub email: String,
    /// Account secret sent as `password` on login.
    pub password: String,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl UpstreamConfig {
    /// `{base_url}/api/v1/passport/auth/login`
    pub fn login_url(&self) -> String {
        format!("{}/api/v1/passport/auth/login", self.base_url)
    }

    /// `{base_url}/api/v1/user/getSubscribe`
    pub fn subscribe_pointer_url(&self) -> String {
        format!("{}/api/v1/user/getSubscribe", self.base_url)
    }
}

/// Global configuration shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    /// Age after which a cached credential is replaced.
    pub credential_expiry: TimeDelta,
}

impl AppConfig {
    /// Build the configuration from a variable source, the process
    /// environment in production.
    ///
    /// | Variable                 | Default     | Description                          |
    /// |--------------------------|-------------|--------------------------------------|
    /// | `API_BASE_URL`           | (required)  | Upstream base URL                    |
    /// | `API_EMAIL`              | (required)  | Account identifier                   |
    /// | `API_PASSWORD`           | (required)  | Account secret                       |
    /// | `CREDENTIAL_EXPIRY_SECS` | `3600000`   | Credential staleness window          |
    ///
    /// Each required variable may be replaced by `<NAME>_FILE` pointing at a
    /// file whose trimmed contents are the value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = env_or_file("API_BASE_URL", &lookup)
            .ok_or(ConfigError::Missing("API_BASE_URL"))?;
        let email = env_or_file("API_EMAIL", &lookup).ok_or(ConfigError::Missing("API_EMAIL"))?;
        let password =
            env_or_file("API_PASSWORD", &lookup).ok_or(ConfigError::Missing("API_PASSWORD"))?;

        let expiry_secs = match lookup("CREDENTIAL_EXPIRY_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::Invalid("CREDENTIAL_EXPIRY_SECS", raw.clone()))?,
            None => DEFAULT_CREDENTIAL_EXPIRY_SECS,
        };
        let credential_expiry = TimeDelta::try_seconds(expiry_secs).ok_or_else(|| {
            ConfigError::Invalid("CREDENTIAL_EXPIRY_SECS", expiry_secs.to_string())
        })?;

        Ok(Self {
            upstream: UpstreamConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                email,
                password,
            },
            credential_expiry,
        })
    }
}

/// Resolve `name` from the lookup, falling back to the file named by
/// `{name}_FILE`. Empty values count as unset.
fn env_or_file<F>(name: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
        return Some(value);
    }

    let path = lookup(&format!("{name}_FILE")).filter(|p| !p.is_empty())?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => Some(contents.trim().to_string()).filter(|v| !v.is_empty()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            error!(variable = name, path = %path, error = %e, "failed to read secret file");
            None
        }
    }
}
