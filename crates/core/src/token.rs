// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token metadata.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scope that matches any required scope.
pub const WILDCARD_SCOPE: &str = "*";

/// Metadata describing an issued bearer token.
///
/// Timestamps are epoch milliseconds. `window_start`/`window_count` carry
/// the sliding one-minute rate window across persistence so a restart does
/// not reset in-flight budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub subject: String,
    pub scopes: BTreeSet<String>,
    pub issued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub admin: bool,
    pub rate_limit_per_minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<u64>,
    #[serde(default)]
    pub window_start: u64,
    #[serde(default)]
    pub window_count: u32,
}

impl Token {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms >= expires_at,
            None => false,
        }
    }

    /// True when the token holds `scope` directly or via the wildcard.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope) || self.scopes.contains(WILDCARD_SCOPE)
    }

    /// True for the persistent admin class minted when no identity
    /// provider is configured.
    pub fn is_bootstrap_class(&self) -> bool {
        self.admin && self.expires_at.is_none()
    }
}

/// Canonicalize a scope list: trim, drop empties, de-duplicate, sort.
pub fn canonical_scopes<I, S>(scopes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    scopes
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Generate an opaque 256-bit URL-safe token value.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
