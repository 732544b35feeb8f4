// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandboxed execution harness for automation actions.
//!
//! An action names a registered handler. The harness re-executes the
//! daemon binary as `mahid sandbox-worker`, hands it the action plus a
//! limits payload on stdin, and reads exactly one JSON result line back.
//! The child applies OS resource limits before dispatching; capability
//! gates (file/network/subprocess) are enforced by the sandbox context
//! the handlers run against. Callers always get a [`SandboxResult`] for
//! target-side failures; only pre-spawn refusals surface as errors.

pub mod actions;
mod limits;
pub mod worker;

pub(crate) use limits::LimitsPayload;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{PermissionSettings, SandboxSettings};

const TIMEOUT_ERROR: &str = "Timed out waiting for sandbox action";
const NO_RESULT_ERROR: &str = "Sandbox process exited without result";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Action '{target}' requires disabled permissions: {denied}")]
    PermissionDenied { target: String, denied: String },

    #[error("Unknown sandbox action '{0}'")]
    UnknownTarget(String),

    #[error("Unknown permission '{0}'")]
    UnknownPermission(String),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// High-level permission switches sourced from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPermissions {
    pub file_access: bool,
    pub network_access: bool,
    pub calendar_access: bool,
    pub mail_access: bool,
    pub browser_access: bool,
    pub shell_access: bool,
    pub automation_access: bool,
}

impl SandboxPermissions {
    pub fn from_settings(settings: &PermissionSettings) -> Self {
        Self {
            file_access: settings.file_access,
            network_access: settings.network_access,
            calendar_access: settings.calendar_access,
            mail_access: settings.mail_access,
            browser_access: settings.browser_access,
            shell_access: settings.shell_access,
            automation_access: settings.automation_access,
        }
    }

    /// Look up a switch by name; unknown names are an error, not false.
    pub fn allows(&self, permission: &str) -> Result<bool, SandboxError> {
        match permission {
            "file_access" => Ok(self.file_access),
            "network_access" => Ok(self.network_access),
            "calendar_access" => Ok(self.calendar_access),
            "mail_access" => Ok(self.mail_access),
            "browser_access" => Ok(self.browser_access),
            "shell_access" => Ok(self.shell_access),
            "automation_access" => Ok(self.automation_access),
            other => Err(SandboxError::UnknownPermission(other.to_string())),
        }
    }

    pub fn as_map(&self) -> BTreeMap<&'static str, bool> {
        BTreeMap::from([
            ("file_access", self.file_access),
            ("network_access", self.network_access),
            ("calendar_access", self.calendar_access),
            ("mail_access", self.mail_access),
            ("browser_access", self.browser_access),
            ("shell_access", self.shell_access),
            ("automation_access", self.automation_access),
        ])
    }
}

/// Tunable limits and environment options for the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub cpu_time_seconds: u64,
    pub wall_time_seconds: f64,
    pub memory_bytes: u64,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub allow_subprocesses: bool,
    pub allow_network: bool,
    pub max_open_files: Option<u64>,
    pub max_processes: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub idle_priority: bool,
    pub nice_increment: i32,
    pub collect_usage: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cpu_time_seconds: 5,
            wall_time_seconds: 10.0,
            memory_bytes: 512 * 1024 * 1024,
            working_dir: PathBuf::from("./sandbox"),
            env: BTreeMap::new(),
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

impl SandboxConfig {
    /// Roomier limits for interactive workstation use.
    pub fn generous(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            cpu_time_seconds: 10,
            wall_time_seconds: 15.0,
            memory_bytes: 1024 * 1024 * 1024,
            working_dir: working_dir.into(),
            max_open_files: Some(512),
            max_processes: Some(128),
            max_output_bytes: Some(256 * 1024 * 1024),
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &SandboxSettings, default_dir: &Path) -> Self {
        Self {
            cpu_time_seconds: settings.cpu_time_seconds,
            wall_time_seconds: settings.wall_time_seconds,
            memory_bytes: settings.memory_bytes,
            working_dir: settings
                .working_dir
                .clone()
                .unwrap_or_else(|| default_dir.join("sandbox")),
            env: BTreeMap::new(),
            allow_subprocesses: settings.allow_subprocesses,
            allow_network: settings.allow_network,
            max_open_files: settings.max_open_files,
            max_processes: settings.max_processes,
            max_output_bytes: settings.max_output_bytes,
            idle_priority: settings.idle_priority,
            nice_increment: settings.nice_increment,
            collect_usage: settings.collect_usage,
        }
    }
}

/// Descriptor for an executable unit within the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxAction {
    pub target: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub required_permissions: BTreeSet<String>,
}

impl SandboxAction {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), ..Self::default() }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn requiring(mut self, permission: impl Into<String>) -> Self {
        self.required_permissions.insert(permission.into());
        self
    }
}

/// Structured outcome of one sandboxed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    pub value: Option<Value>,
    pub stdout: String,
    pub stderr: String,
    pub duration: f64,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl SandboxResult {
    fn failure(error: impl Into<String>, duration: f64, timed_out: bool) -> Self {
        Self {
            success: false,
            value: None,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            timed_out,
            error: Some(error.into()),
            limits: None,
            usage: None,
        }
    }
}

/// Payload delivered to the sandbox worker on stdin, one JSON line.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChildPayload {
    pub(crate) target: String,
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: Map<String, Value>,
    pub(crate) limits: LimitsPayload,
}

/// Result message emitted by the sandbox worker on stdout, one JSON line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum ChildMessage {
    Ok {
        #[serde(default)]
        result: Value,
        stdout: String,
        stderr: String,
        duration: f64,
        #[serde(default)]
        limits: Value,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        usage: Value,
    },
    Error {
        error: String,
        stdout: String,
        stderr: String,
        #[serde(default)]
        limits: Value,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        usage: Value,
    },
}

/// Execute automation actions inside a locked-down worker process.
pub struct SandboxHarness {
    config: SandboxConfig,
    permissions: Mutex<SandboxPermissions>,
    worker_program: PathBuf,
}

impl SandboxHarness {
    pub fn new(
        config: SandboxConfig,
        permissions: SandboxPermissions,
    ) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&config.working_dir)?;
        let worker_program = std::env::current_exe()?;
        Ok(Self { config, permissions: Mutex::new(permissions), worker_program })
    }

    /// Override the worker binary; tests point this at the built `mahid`.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = program.into();
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn permissions(&self) -> SandboxPermissions {
        self.permissions.lock().clone()
    }

    /// Publish a new permission set. In-flight executions keep the
    /// snapshot taken at their spawn.
    pub fn update_permissions(&self, permissions: SandboxPermissions) {
        *self.permissions.lock() = permissions;
    }

    /// Folded into status responses.
    pub fn status_snapshot(&self) -> Value {
        serde_json::json!({
            "permissions": self.permissions(),
            "limits": {
                "cpu_time_seconds": self.config.cpu_time_seconds,
                "wall_time_seconds": self.config.wall_time_seconds,
                "memory_bytes": self.config.memory_bytes,
                "working_dir": self.config.working_dir,
            },
        })
    }

    /// Run an action to completion in a fresh child process.
    pub fn execute(&self, action: &SandboxAction) -> Result<SandboxResult, SandboxError> {
        let permissions = self.permissions();

        let spec = actions::find(&action.target)
            .ok_or_else(|| SandboxError::UnknownTarget(action.target.clone()))?;

        let mut required: BTreeSet<String> =
            spec.required_permissions.iter().map(|p| p.to_string()).collect();
        required.extend(action.required_permissions.iter().cloned());

        let mut denied = Vec::new();
        for permission in &required {
            if !permissions.allows(permission)? {
                denied.push(permission.clone());
            }
        }
        if !denied.is_empty() {
            return Err(SandboxError::PermissionDenied {
                target: action.target.clone(),
                denied: denied.join(", "),
            });
        }

        std::fs::create_dir_all(&self.config.working_dir)?;
        let payload = ChildPayload {
            target: action.target.clone(),
            args: action.args.clone(),
            kwargs: action.kwargs.clone(),
            limits: LimitsPayload::build(&self.config, &permissions),
        };

        let started = Instant::now();
        let mut child = self.spawn_worker()?;

        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            let line = serde_json::to_string(&payload)
                .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;
            // A child that dies before reading produces EPIPE here; the
            // no-result path below reports it.
            let _ = writeln!(stdin, "{line}");
        }

        let (tx, rx) = mpsc::sync_channel::<Option<ChildMessage>>(1);
        let stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let message = stdout.and_then(|out| {
                BufReader::new(out)
                    .lines()
                    .map_while(Result::ok)
                    .find_map(|line| serde_json::from_str::<ChildMessage>(&line).ok())
            });
            let _ = tx.send(message);
        });

        let wall = Duration::from_secs_f64(self.config.wall_time_seconds.max(0.0));
        let outcome = rx.recv_timeout(wall);
        let duration = started.elapsed().as_secs_f64();

        let result = match outcome {
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                SandboxResult::failure(TIMEOUT_ERROR, duration, true)
            }
            Ok(None) => {
                let _ = child.wait();
                SandboxResult::failure(NO_RESULT_ERROR, duration, false)
            }
            Ok(Some(message)) => {
                let _ = child.wait();
                match message {
                    ChildMessage::Ok { result, stdout, stderr, duration: child_duration, limits, usage } => {
                        SandboxResult {
                            success: true,
                            value: Some(result),
                            stdout,
                            stderr,
                            duration: child_duration,
                            timed_out: false,
                            error: None,
                            limits: non_null(limits),
                            usage: non_null(usage),
                        }
                    }
                    ChildMessage::Error { error, stdout, stderr, limits, usage } => SandboxResult {
                        success: false,
                        value: None,
                        stdout,
                        stderr,
                        duration,
                        timed_out: false,
                        error: Some(error),
                        limits: non_null(limits),
                        usage: non_null(usage),
                    },
                }
            }
        };
        let _ = reader.join();

        tracing::debug!(
            action = %action.target,
            success = result.success,
            timed_out = result.timed_out,
            "sandbox action finished"
        );
        Ok(result)
    }

    fn spawn_worker(&self) -> Result<std::process::Child, SandboxError> {
        let nice = Path::new("/usr/bin/nice");
        let use_nice =
            self.config.idle_priority && self.config.nice_increment > 0 && nice.exists();

        let mut command = if use_nice {
            let mut command = Command::new(nice);
            command
                .arg("-n")
                .arg(self.config.nice_increment.to_string())
                .arg(&self.worker_program);
            command
        } else {
            Command::new(&self.worker_program)
        };

        command
            .arg("sandbox-worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        Ok(command.spawn()?)
    }
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
