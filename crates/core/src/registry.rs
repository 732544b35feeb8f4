// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe directory of live transport endpoints and issued tokens.
//!
//! The registry is the single source of truth for what is reachable right
//! now. Every read returns an owned copy so callers never hold the lock
//! across I/O.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::endpoint::{Endpoint, Protocol};
use crate::token::{canonical_scopes, generate_token_value};

/// Lightweight handshake token issued for runtime clients.
///
/// Distinct from the auth manager's bearer tokens: these carry no expiry
/// or rate limit and live only for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryToken {
    #[serde(rename = "token")]
    pub value: String,
    pub scopes: BTreeSet<String>,
    pub issued_at: u64,
}

/// Serializable dump of the registry for status responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub endpoints: IndexMap<String, Vec<Endpoint>>,
    pub tokens: Vec<RegistryToken>,
}

#[derive(Default)]
struct Inner {
    endpoints: IndexMap<Protocol, IndexMap<String, Endpoint>>,
    tokens: IndexMap<String, RegistryToken>,
}

/// Concurrency-safe endpoint directory keyed by `(protocol, name)`.
pub struct EndpointRegistry {
    inner: Mutex<Inner>,
    epoch_ms: fn() -> u64,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for protocol in Protocol::ALL {
            inner.endpoints.insert(protocol, IndexMap::new());
        }
        Self { inner: Mutex::new(inner), epoch_ms: default_epoch_ms }
    }

    /// Register an endpoint, overwriting any previous entry with the same
    /// `(protocol, name)` identity.
    pub fn register(&self, endpoint: Endpoint) {
        let mut inner = self.inner.lock();
        inner
            .endpoints
            .entry(endpoint.protocol)
            .or_default()
            .insert(endpoint.name.clone(), endpoint);
    }

    pub fn bulk_register(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        for endpoint in endpoints {
            self.register(endpoint);
        }
    }

    /// Remove an endpoint. Returns true when an entry existed.
    pub fn unregister(&self, protocol: Protocol, name: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .endpoints
            .get_mut(&protocol)
            .map(|map| map.shift_remove(name).is_some())
            .unwrap_or(false)
    }

    /// Ordered snapshot of endpoints, optionally filtered by protocol.
    pub fn endpoints(&self, protocol: Option<Protocol>) -> Vec<Endpoint> {
        let inner = self.inner.lock();
        match protocol {
            Some(protocol) => inner
                .endpoints
                .get(&protocol)
                .map(|map| map.values().cloned().collect())
                .unwrap_or_default(),
            None => inner.endpoints.values().flat_map(|map| map.values().cloned()).collect(),
        }
    }

    pub fn find(&self, protocol: Protocol, name: &str) -> Option<Endpoint> {
        let inner = self.inner.lock();
        inner.endpoints.get(&protocol).and_then(|map| map.get(name).cloned())
    }

    /// Issue a process-lifetime handshake token with the given scopes.
    pub fn issue_token<I, S>(&self, scopes: I) -> RegistryToken
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let token = RegistryToken {
            value: generate_token_value(),
            scopes: canonical_scopes(scopes),
            issued_at: (self.epoch_ms)(),
        };
        self.inner.lock().tokens.insert(token.value.clone(), token.clone());
        token
    }

    pub fn revoke_token(&self, value: &str) -> bool {
        self.inner.lock().tokens.shift_remove(value).is_some()
    }

    /// Check a handshake token, optionally requiring a scope.
    pub fn authenticate(&self, value: &str, required_scope: Option<&str>) -> bool {
        let inner = self.inner.lock();
        match inner.tokens.get(value) {
            Some(token) => match required_scope {
                Some(scope) => token.scopes.contains(scope),
                None => true,
            },
            None => false,
        }
    }

    /// Copy-on-read dump for status responses.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock();
        RegistrySnapshot {
            endpoints: inner
                .endpoints
                .iter()
                .map(|(protocol, map)| {
                    (protocol.as_str().to_string(), map.values().cloned().collect())
                })
                .collect(),
            tokens: inner.tokens.values().cloned().collect(),
        }
    }
}

fn default_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
