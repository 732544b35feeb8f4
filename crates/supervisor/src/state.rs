// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor state file: the canonical offline status source.
//!
//! Rewritten atomically after every transition so CLI status commands can
//! read it even when the daemon socket is unreachable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifecycle of the supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Initializing,
    Ready,
    Restarting,
    Failed,
    Stopping,
    Stopped,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Initializing => "initializing",
            HealthStatus::Ready => "ready",
            HealthStatus::Restarting => "restarting",
            HealthStatus::Failed => "failed",
            HealthStatus::Stopping => "stopping",
            HealthStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Payload served by the health endpoint; 200 only when `Ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: HealthStatus,
    pub running: bool,
    pub child_pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub timestamp: f64,
}

impl HealthPayload {
    pub fn initializing(now: f64) -> Self {
        Self {
            status: HealthStatus::Initializing,
            running: false,
            child_pid: None,
            restart_count: 0,
            last_exit_code: None,
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Full persisted supervisor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    pub timestamp: f64,
    pub running: bool,
    pub child_pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub last_start_time: Option<f64>,
    pub last_exit_time: Option<f64>,
    pub health: HealthPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<HealthEndpoint>,
}

/// Atomic replace via a sibling temp file.
pub fn write_state(path: &Path, state: &SupervisorState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_string_pretty(state)
        .map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, payload)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
