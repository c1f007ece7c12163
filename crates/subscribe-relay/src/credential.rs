//! Single-slot credential cache.
//!
//! Holds the upstream token together with the time it was acquired. The slot
//! is replaced wholesale on every refresh so readers always see one complete
//! [`Credential`].

use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::snippet;

/// Number of token characters that may appear in logs and `Debug` output.
pub const TOKEN_LOG_PREFIX: usize = 30;

/// An upstream authorization token and the moment it was obtained.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub acquired_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &format_args!("{}...", self.prefix(TOKEN_LOG_PREFIX)))
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Credential {
    /// The first `len` characters of the token, for log output.
    pub fn prefix(&self, len: usize) -> &str {
        snippet(&self.value, len)
    }
}

/// Process-wide credential slot.
///
/// Staleness is measured from acquisition time only; any expiry announced by
/// the upstream is ignored.
#[derive(Debug)]
pub struct CredentialCache {
    slot: RwLock<Option<Credential>>,
    expiry: TimeDelta,
}

impl CredentialCache {
    pub fn new(expiry: TimeDelta) -> Self {
        Self {
            slot: RwLock::new(None),
            expiry,
        }
    }

    /// Clone the cached credential, if any.
    pub fn get(&self) -> Option<Credential> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `true` when nothing is cached or the cached value has reached the
    /// expiry window.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Some(credential) => now - credential.acquired_at >= self.expiry,
            None => true,
        }
    }

    /// Replace the cached credential and return the stored copy.
    pub fn set(&self, value: impl Into<String>, now: DateTime<Utc>) -> Credential {
        let credential = Credential {
            value: value.into(),
            acquired_at: now,
        };
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        credential
    }
}
