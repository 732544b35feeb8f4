// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token minting, validation, and rate limiting.
//!
//! All state lives behind one mutex; the token store is called inside
//! that lock, making persistence a serialisation point. That is
//! acceptable at mint/revoke rates, and it guarantees a token is on disk
//! before `mint` returns.

mod store;

pub use store::{AuthError, TokenStore};

use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use mahi_core::{canonical_scopes, generate_token_value, Clock, SystemClock, Token};

use crate::config::AuthSettings;

/// Scopes granted to the bootstrap token.
const BOOTSTRAP_SCOPES: [&str; 8] =
    ["*", "admin", "execute", "index", "plan", "query", "status", "stream"];

/// Outcome of a usage recording; the rate limit is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Usage {
    Ok,
    RateLimited,
}

struct Inner {
    records: IndexMap<String, Token>,
    bootstrap_value: Option<String>,
}

/// Mint, persist, and validate access tokens.
pub struct AuthManager<C: Clock = SystemClock> {
    store: TokenStore,
    clock: C,
    default_ttl_seconds: f64,
    default_rate_limit: u32,
    inner: Mutex<Inner>,
}

impl AuthManager<SystemClock> {
    pub fn new(store: TokenStore, settings: &AuthSettings) -> Result<Self, AuthError> {
        Self::with_clock(store, settings, SystemClock)
    }
}

impl<C: Clock> AuthManager<C> {
    pub fn with_clock(
        store: TokenStore,
        settings: &AuthSettings,
        clock: C,
    ) -> Result<Self, AuthError> {
        let records = match store.load() {
            Ok(records) => records,
            Err(AuthError::Decrypt) if settings.reset_on_decrypt_error => {
                tracing::warn!("token store could not be decrypted; starting empty");
                IndexMap::new()
            }
            Err(e) => return Err(e),
        };
        let bootstrap_value = records
            .values()
            .find(|t| t.subject == "bootstrap" && t.is_bootstrap_class())
            .map(|t| t.value.clone());
        Ok(Self {
            store,
            clock,
            default_ttl_seconds: settings.token_ttl_seconds,
            default_rate_limit: settings.rate_limit_per_minute,
            inner: Mutex::new(Inner { records, bootstrap_value }),
        })
    }

    /// Mint a token. `ttl_seconds` of `None` applies the configured
    /// default; zero or negative disables expiry.
    pub fn mint(
        &self,
        subject: &str,
        scopes: impl IntoIterator<Item = impl AsRef<str>>,
        ttl_seconds: Option<f64>,
        admin: bool,
        rate_limit_per_minute: Option<u32>,
    ) -> Result<Token, AuthError> {
        let issued_at = self.clock.epoch_ms();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let expires_at =
            if ttl > 0.0 { Some(issued_at + (ttl * 1000.0) as u64) } else { None };

        let token = Token {
            value: generate_token_value(),
            subject: subject.to_string(),
            scopes: canonical_scopes(scopes),
            issued_at,
            expires_at,
            admin,
            rate_limit_per_minute: rate_limit_per_minute.unwrap_or(self.default_rate_limit),
            last_used_at: None,
            window_start: 0,
            window_count: 0,
        };

        {
            let mut inner = self.inner.lock();
            inner.records.insert(token.value.clone(), token.clone());
            self.store.save(&inner.records)?;
        }
        tracing::info!(subject, admin, token = %digest(&token.value), "minted token");
        Ok(token)
    }

    pub fn revoke(&self, value: &str) -> Result<bool, AuthError> {
        let existed = {
            let mut inner = self.inner.lock();
            let existed = inner.records.shift_remove(value).is_some();
            if existed {
                self.store.save(&inner.records)?;
            }
            existed
        };
        if existed {
            tracing::info!(token = %digest(value), "revoked token");
        }
        Ok(existed)
    }

    /// Look up a token, rejecting unknown, expired, or out-of-scope
    /// values. Returns an owned copy.
    pub fn validate(&self, value: &str, scope: Option<&str>) -> Option<Token> {
        let inner = self.inner.lock();
        let token = inner.records.get(value)?;
        if token.is_expired(self.clock.epoch_ms()) {
            return None;
        }
        if let Some(scope) = scope {
            if !token.has_scope(scope) {
                return None;
            }
        }
        Some(token.clone())
    }

    /// Count a call against the token's sliding one-minute window.
    ///
    /// The window resets once 60 seconds have elapsed since
    /// `window_start`; the call that pushes the counter past the limit is
    /// the first rejected one and is not persisted.
    pub fn record_usage(&self, value: &str) -> Result<Usage, AuthError> {
        let now = self.clock.epoch_ms();
        let usage = {
            let mut inner = self.inner.lock();
            let Some(token) = inner.records.get_mut(value) else {
                return Ok(Usage::Ok);
            };
            if now.saturating_sub(token.window_start) >= 60_000 {
                token.window_start = now;
                token.window_count = 0;
            }
            token.window_count += 1;
            token.last_used_at = Some(now);
            if token.window_count > token.rate_limit_per_minute {
                Usage::RateLimited
            } else {
                self.store.save(&inner.records)?;
                Usage::Ok
            }
        };
        match usage {
            Usage::Ok => tracing::debug!(token = %digest(value), "token used"),
            Usage::RateLimited => {
                tracing::warn!(token = %digest(value), "token rate limit exceeded")
            }
        }
        Ok(usage)
    }

    pub fn list(&self) -> Vec<Token> {
        self.inner.lock().records.values().cloned().collect()
    }

    /// Idempotently guarantee a persisted admin token exists.
    ///
    /// Returns the token and whether it was minted by this call.
    pub fn ensure_bootstrap(&self) -> Result<(Token, bool), AuthError> {
        {
            let inner = self.inner.lock();
            if let Some(value) = &inner.bootstrap_value {
                if let Some(token) = inner.records.get(value) {
                    return Ok((token.clone(), false));
                }
            }
        }
        let token = self.mint("bootstrap", BOOTSTRAP_SCOPES, Some(0.0), true, None)?;
        self.inner.lock().bootstrap_value = Some(token.value.clone());
        Ok((token, true))
    }

    #[cfg(test)]
    pub(crate) fn clock_ref(&self) -> &C {
        &self.clock
    }

    #[cfg(test)]
    pub(crate) fn into_store(self) -> TokenStore {
        self.store
    }

    /// Revoke the current bootstrap token and mint a replacement.
    pub fn rotate_bootstrap(&self) -> Result<Token, AuthError> {
        let previous = self.inner.lock().bootstrap_value.clone();
        if let Some(previous) = previous {
            self.revoke(&previous)?;
        }
        let token = self.mint("bootstrap", BOOTSTRAP_SCOPES, Some(0.0), true, None)?;
        self.inner.lock().bootstrap_value = Some(token.value.clone());
        Ok(token)
    }
}

/// Audit-safe token reference: first four characters plus a SHA-256
/// prefix. Raw token values never reach the logs.
pub fn digest(value: &str) -> String {
    let hash = Sha256::digest(value.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in hash.iter().take(8) {
        let _ = write!(hex, "{byte:02x}");
    }
    let head: String = value.chars().take(4).collect();
    format!("token:{head}…{hex}")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
