// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: TOML file plus environment overrides.
//!
//! Override precedence, lowest to highest: config file,
//! `MAHI_CONFIG_OVERRIDES` / `MAHI_SECRET_OVERRIDES` JSON blobs,
//! `MAHI_CFG__<PATH>` / `MAHI_SECRET__<PATH>` dotted-path variables
//! (path segments joined by `__`, case-insensitive). Values sourced from
//! a secret variant are tracked so they are never written back to disk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::env;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("Invalid override in {var}: {reason}")]
    InvalidOverride { var: String, reason: String },

    #[error("Invalid config section '{section}': {reason}")]
    InvalidSection { section: &'static str, reason: String },
}

/// Merged configuration tree plus the set of secret leaf paths.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    root: Value,
    secret_paths: BTreeSet<String>,
}

impl LoadedConfig {
    /// Load the config file named by `MAHI_CONFIG` (or
    /// `<state_dir>/config.toml` when unset) and apply all environment
    /// overrides from the process environment.
    pub fn load(default_dir: &Path) -> Result<Self, ConfigError> {
        let path = env::config_path().unwrap_or_else(|| default_dir.join("config.toml"));
        Self::from_sources(Some(&path), std::env::vars())
    }

    /// Build from an explicit file path and an explicit variable set.
    /// Tests drive this directly instead of mutating the process env.
    pub fn from_sources(
        path: Option<&Path>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut root = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
                let table: toml::Value = toml::from_str(&raw)
                    .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
                toml_to_json(table)
            }
            _ => Value::Object(Map::new()),
        };
        if !root.is_object() {
            root = Value::Object(Map::new());
        }

        let mut secret_paths = BTreeSet::new();

        // Env vars are applied in a fixed order so dotted-path overrides
        // win over the JSON blobs regardless of iteration order.
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        for (var, payload) in
            [env::CONFIG_OVERRIDES_ENV, env::SECRET_OVERRIDES_ENV].iter().filter_map(|name| {
                vars.iter()
                    .find(|(k, _)| k.as_str() == *name)
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
        {
            let overrides: Value = serde_json::from_str(&payload).map_err(|e| {
                ConfigError::InvalidOverride { var: var.clone(), reason: e.to_string() }
            })?;
            let Value::Object(overrides) = overrides else {
                return Err(ConfigError::InvalidOverride {
                    var,
                    reason: "expected a JSON object".to_string(),
                });
            };
            if var == env::SECRET_OVERRIDES_ENV {
                collect_leaf_paths(&overrides, String::new(), &mut secret_paths);
            }
            deep_merge(&mut root, Value::Object(overrides));
        }

        for (key, raw) in &vars {
            let (segments, secret) = if let Some(rest) = key.strip_prefix(env::CFG_PREFIX) {
                (path_segments(rest), false)
            } else if let Some(rest) = key.strip_prefix(env::SECRET_PREFIX) {
                (path_segments(rest), true)
            } else {
                continue;
            };
            if segments.is_empty() {
                continue;
            }
            set_path(&mut root, &segments, parse_scalar(raw));
            if secret {
                secret_paths.insert(segments.join("."));
            }
        }

        Ok(Self { root, secret_paths })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// The config tree with secret-sourced leaves removed, safe to write
    /// back to disk.
    pub fn persistable(&self) -> Value {
        let mut copy = self.root.clone();
        for path in &self.secret_paths {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            remove_path(&mut copy, &segments);
        }
        copy
    }

    /// Deserialize the typed daemon configuration.
    pub fn daemon(&self) -> Result<DaemonConfig, ConfigError> {
        Ok(DaemonConfig {
            auth: self.section("auth")?,
            gateway: self.section("gateway")?,
            runtime_pool: self.section("runtime_pool")?,
            sandbox: self.section("sandbox")?,
            permissions: self.section("permissions")?,
        })
    }

    fn section<T: Default + for<'de> Deserialize<'de>>(
        &self,
        section: &'static str,
    ) -> Result<T, ConfigError> {
        match self.root.get(section) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| ConfigError::InvalidSection { section, reason: e.to_string() }),
            None => Ok(T::default()),
        }
    }
}

/// Typed view of the sections the daemon consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub auth: AuthSettings,
    pub gateway: GatewaySettings,
    pub runtime_pool: PoolSettings,
    pub sandbox: SandboxSettings,
    pub permissions: PermissionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub token_store: TokenStoreSettings,
    pub rate_limit_per_minute: u32,
    /// Default TTL for minted tokens; 0 disables expiry.
    pub token_ttl_seconds: f64,
    /// Start with an empty token map when the encrypted store cannot be
    /// decrypted, instead of refusing to boot.
    pub reset_on_decrypt_error: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_store: TokenStoreSettings::default(),
            rate_limit_per_minute: 120,
            token_ttl_seconds: 3600.0,
            reset_on_decrypt_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStoreSettings {
    /// One of `keychain`, `file`, `memory`.
    pub backend: String,
    pub keyring_service: String,
    pub file_path: Option<PathBuf>,
}

impl Default for TokenStoreSettings {
    fn default() -> Self {
        Self {
            backend: "keychain".to_string(),
            keyring_service: "mahi-automation".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub http_host: String,
    pub http_port: u16,
    pub ws_host: String,
    pub ws_port: u16,
    pub ipc_path: Option<PathBuf>,
    pub http_backend_timeout_seconds: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 8710,
            ws_host: "127.0.0.1".to_string(),
            ws_port: 8711,
            ipc_path: None,
            http_backend_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub enabled: bool,
    pub min_runtimes: usize,
    pub max_runtimes: usize,
    pub desired_runtimes: Option<usize>,
    pub base_port: u16,
    pub heartbeat_interval_seconds: f64,
    pub restart_backoff_seconds: f64,
    pub shutdown_timeout_seconds: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_runtimes: 0,
            max_runtimes: 2,
            desired_runtimes: None,
            base_port: 9600,
            heartbeat_interval_seconds: 5.0,
            restart_backoff_seconds: 3.0,
            shutdown_timeout_seconds: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    pub file_access: bool,
    pub network_access: bool,
    pub calendar_access: bool,
    pub mail_access: bool,
    pub browser_access: bool,
    pub shell_access: bool,
    pub automation_access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub cpu_time_seconds: u64,
    pub wall_time_seconds: f64,
    pub memory_bytes: u64,
    pub working_dir: Option<PathBuf>,
    pub allow_subprocesses: bool,
    pub allow_network: bool,
    pub max_open_files: Option<u64>,
    pub max_processes: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub idle_priority: bool,
    pub nice_increment: i32,
    pub collect_usage: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            cpu_time_seconds: 5,
            wall_time_seconds: 10.0,
            memory_bytes: 512 * 1024 * 1024,
            working_dir: None,
            allow_subprocesses: false,
            allow_network: false,
            max_open_files: Some(256),
            max_processes: Some(64),
            max_output_bytes: Some(64 * 1024 * 1024),
            idle_priority: true,
            nice_increment: 10,
            collect_usage: true,
        }
    }
}

/// Recursively merge `overlay` into `base`; objects merge key-wise,
/// everything else replaces.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        deep_merge(slot, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let slot = map.entry(head.clone()).or_insert_with(|| Value::Object(Map::new()));
    set_path(slot, rest, value);
}

fn remove_path(root: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(map) = root.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.remove(head);
        return;
    }
    if let Some(slot) = map.get_mut(head) {
        remove_path(slot, rest);
    }
}

fn collect_leaf_paths(map: &Map<String, Value>, prefix: String, out: &mut BTreeSet<String>) {
    for (key, value) in map {
        let path =
            if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Value::Object(inner) => collect_leaf_paths(inner, path, out),
            _ => {
                out.insert(path);
            }
        }
    }
}

/// `MODEL__BACKEND` -> `["model", "backend"]`.
fn path_segments(raw: &str) -> Vec<String> {
    raw.split("__").map(|s| s.to_ascii_lowercase()).filter(|s| !s.is_empty()).collect()
}

/// Parse an env value as JSON (true/false/numbers/objects), falling back
/// to a plain string.
fn parse_scalar(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
