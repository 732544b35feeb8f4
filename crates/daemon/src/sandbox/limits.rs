// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-side resource limit application.
//!
//! Runs inside the freshly spawned sandbox worker before the handler is
//! dispatched. Limit application is best effort: a kernel that refuses a
//! particular rlimit does not abort the action, but the snapshot the
//! parent receives reflects what actually stuck.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use nix::sys::resource::{getrlimit, getrusage, setrlimit, Resource, UsageWho};

use super::{SandboxConfig, SandboxPermissions};

/// Limits and capability flags serialized to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LimitsPayload {
    pub(crate) cpu_time_seconds: u64,
    pub(crate) memory_bytes: u64,
    pub(crate) max_output_bytes: Option<u64>,
    pub(crate) max_open_files: Option<u64>,
    pub(crate) max_processes: Option<u64>,
    pub(crate) working_dir: PathBuf,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) allow_network: bool,
    pub(crate) allow_files: bool,
    pub(crate) allow_subprocesses: bool,
    pub(crate) collect_usage: bool,
}

impl LimitsPayload {
    pub(crate) fn build(config: &SandboxConfig, permissions: &SandboxPermissions) -> Self {
        Self {
            cpu_time_seconds: config.cpu_time_seconds,
            memory_bytes: config.memory_bytes,
            max_output_bytes: config.max_output_bytes,
            max_open_files: config.max_open_files,
            max_processes: config.max_processes,
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            allow_network: config.allow_network || permissions.network_access,
            allow_files: permissions.file_access,
            allow_subprocesses: config.allow_subprocesses,
            collect_usage: config.collect_usage,
        }
    }
}

/// Enter the sandbox working directory, merge env, and clamp rlimits.
/// Returns a snapshot of the limits in effect afterwards.
pub(crate) fn apply(payload: &LimitsPayload) -> Value {
    if std::fs::create_dir_all(&payload.working_dir).is_ok() {
        let _ = std::env::set_current_dir(&payload.working_dir);
    }
    for (key, value) in &payload.env {
        std::env::set_var(key, value);
    }

    if payload.cpu_time_seconds > 0 {
        let _ = setrlimit(Resource::RLIMIT_CPU, payload.cpu_time_seconds, payload.cpu_time_seconds);
    }
    #[cfg(target_os = "linux")]
    if payload.memory_bytes > 0 {
        let _ = setrlimit(Resource::RLIMIT_AS, payload.memory_bytes, payload.memory_bytes);
    }
    if let Some(limit) = payload.max_output_bytes.filter(|l| *l > 0) {
        let _ = setrlimit(Resource::RLIMIT_FSIZE, limit, limit);
    }
    if let Some(limit) = payload.max_open_files.filter(|l| *l > 0) {
        let _ = setrlimit(Resource::RLIMIT_NOFILE, limit, limit);
    }
    // RLIMIT_NPROC is per-UID, not per-process-tree; the configured value
    // must leave headroom for everything else the user runs.
    #[cfg(target_os = "linux")]
    if let Some(limit) = payload.max_processes.filter(|l| *l > 0) {
        let _ = setrlimit(Resource::RLIMIT_NPROC, limit, limit);
    }

    snapshot()
}

/// Current soft/hard rlimit values, keyed the way status payloads expect.
pub(crate) fn snapshot() -> Value {
    let mut out = Map::new();
    let mut put = |label: &str, resource: Resource| {
        if let Ok((soft, hard)) = getrlimit(resource) {
            out.insert(label.to_string(), serde_json::json!({ "soft": soft, "hard": hard }));
        }
    };
    put("cpu_time", Resource::RLIMIT_CPU);
    #[cfg(target_os = "linux")]
    put("memory", Resource::RLIMIT_AS);
    put("output_size", Resource::RLIMIT_FSIZE);
    put("open_files", Resource::RLIMIT_NOFILE);
    #[cfg(target_os = "linux")]
    put("processes", Resource::RLIMIT_NPROC);
    Value::Object(out)
}

/// Self rusage for the `usage` field of the result message.
pub(crate) fn usage_snapshot() -> Value {
    match getrusage(UsageWho::RUSAGE_SELF) {
        Ok(usage) => {
            let user = usage.user_time();
            let system = usage.system_time();
            serde_json::json!({
                "user_time": user.tv_sec() as f64 + user.tv_usec() as f64 / 1e6,
                "system_time": system.tv_sec() as f64 + system.tv_usec() as f64 / 1e6,
                "max_rss": usage.max_rss(),
                "in_block_ops": usage.block_reads(),
                "out_block_ops": usage.block_writes(),
                "context_switches_voluntary": usage.voluntary_context_switches(),
                "context_switches_involuntary": usage.involuntary_context_switches(),
            })
        }
        Err(_) => Value::Object(Map::new()),
    }
}
