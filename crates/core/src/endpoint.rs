// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime endpoint descriptor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Transport protocol an endpoint is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Grpc,
    Http,
    Ws,
    Ipc,
}

impl Protocol {
    /// All protocols, in registry snapshot order.
    pub const ALL: [Protocol; 4] = [Protocol::Grpc, Protocol::Http, Protocol::Ws, Protocol::Ipc];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
            Protocol::Ws => "ws",
            Protocol::Ipc => "ipc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Ok(Protocol::Grpc),
            "http" => Ok(Protocol::Http),
            "ws" => Ok(Protocol::Ws),
            "ipc" => Ok(Protocol::Ipc),
            other => Err(RegistryError::InvalidProtocol(other.to_string())),
        }
    }
}

/// A single endpoint exposed by the daemon.
///
/// Identity is `(protocol, name)`; re-registering the same identity
/// overwrites the previous entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub protocol: Protocol,
    pub address: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, protocol: Protocol, address: impl Into<String>) -> Self {
        Self { name: name.into(), protocol, address: address.into(), metadata: Map::new() }
    }

    /// Attach a metadata entry, consuming and returning the endpoint.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
