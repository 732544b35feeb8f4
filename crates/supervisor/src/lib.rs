// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mahi-supervisor: keep the daemon alive.
//!
//! Runs the daemon binary as a child in its own process group, restarts
//! it on non-zero exit within a sliding restart budget with exponential
//! backoff, serves an HTTP health probe, and persists a JSON state file
//! after every transition.

mod health;
pub mod state;

pub use state::{HealthEndpoint, HealthPayload, HealthStatus, SupervisorState};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write as _;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Supervisor requires a command to execute")]
    EmptyCommand,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Restart budget, backoff, and health probe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub window_seconds: f64,
    pub backoff_seconds: f64,
    pub max_backoff_seconds: f64,
    pub graceful_shutdown_seconds: f64,
    pub health_enabled: bool,
    pub health_host: String,
    pub health_port: u16,
    pub health_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window_seconds: 60.0,
            backoff_seconds: 2.0,
            max_backoff_seconds: 30.0,
            graceful_shutdown_seconds: 10.0,
            health_enabled: true,
            health_host: "127.0.0.1".to_string(),
            health_port: 0,
            health_path: "/healthz".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Read the `[supervisor]` section of a TOML config file; missing
    /// file or section yields defaults.
    pub fn from_config_file(path: Option<&Path>) -> Self {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct FileConfig {
            supervisor: Option<SupervisorConfig>,
        }

        let Some(path) = path else { return Self::default() };
        let Ok(raw) = std::fs::read_to_string(path) else { return Self::default() };
        match toml::from_str::<FileConfig>(&raw) {
            Ok(file) => file.supervisor.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "unreadable supervisor config");
                Self::default()
            }
        }
    }
}

/// Delay before the next restart given the current attempt count:
/// `min(max_backoff, backoff * 2^(attempts - 1))`.
fn backoff_delay(base: f64, max_backoff: f64, attempts: usize) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }
    let exponent = attempts.saturating_sub(1) as i32;
    (base * 2f64.powi(exponent)).min(max_backoff)
}

/// Sliding window of restart timestamps (epoch seconds).
struct RestartWindow {
    history: VecDeque<f64>,
    window_seconds: f64,
}

impl RestartWindow {
    fn new(window_seconds: f64) -> Self {
        Self { history: VecDeque::new(), window_seconds }
    }

    fn cleanup(&mut self, now: f64) {
        if self.window_seconds <= 0.0 {
            self.history.clear();
            return;
        }
        let threshold = now - self.window_seconds;
        while self.history.front().is_some_and(|t| *t < threshold) {
            self.history.pop_front();
        }
    }

    fn record(&mut self, now: f64) {
        self.history.push_back(now);
        self.cleanup(now);
    }

    fn attempts(&self) -> usize {
        self.history.len()
    }
}

struct Shared {
    stop: AtomicBool,
    gate: Mutex<()>,
    cond: Condvar,
    child_pid: Mutex<Option<i32>>,
}

/// Requests termination from another thread (signal handlers).
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
    graceful: Duration,
}

impl StopHandle {
    /// Set the stop flag, interrupt any backoff wait, and send the
    /// graceful stop signal to the child's process group. A watchdog
    /// escalates to SIGKILL after the grace period.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        {
            let _gate = self.shared.gate.lock();
            self.shared.cond.notify_all();
        }

        let pid = *self.shared.child_pid.lock();
        let Some(pid) = pid else { return };
        let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);

        let shared = Arc::clone(&self.shared);
        let graceful = self.graceful;
        std::thread::spawn(move || {
            let deadline = Instant::now() + graceful;
            while Instant::now() < deadline {
                if *shared.child_pid.lock() != Some(pid) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            if *shared.child_pid.lock() == Some(pid) {
                let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
            }
        });
    }
}

/// Supervise a subprocess with restart/backoff logic.
pub struct Supervisor {
    command: Vec<String>,
    env: Vec<(String, String)>,
    log_path: PathBuf,
    state_file: PathBuf,
    pid_file: Option<PathBuf>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    log_file: Option<Mutex<File>>,
    window: RestartWindow,
    restart_count: u32,
    last_exit_code: Option<i32>,
    last_start_time: Option<f64>,
    last_exit_time: Option<f64>,
    health_payload: Arc<Mutex<HealthPayload>>,
    health_server: Option<health::HealthServer>,
    health_endpoint: Option<HealthEndpoint>,
}

impl Supervisor {
    pub fn new(
        command: Vec<String>,
        log_path: PathBuf,
        state_file: PathBuf,
        config: SupervisorConfig,
    ) -> Result<Self, SupervisorError> {
        if command.is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        let window = RestartWindow::new(config.window_seconds);
        Ok(Self {
            command,
            env: Vec::new(),
            log_path,
            state_file,
            pid_file: None,
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                gate: Mutex::new(()),
                cond: Condvar::new(),
                child_pid: Mutex::new(None),
            }),
            log_file: None,
            window,
            restart_count: 0,
            last_exit_code: None,
            last_start_time: None,
            last_exit_time: None,
            health_payload: Arc::new(Mutex::new(HealthPayload::initializing(epoch_seconds()))),
            health_server: None,
            health_endpoint: None,
            config,
        })
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
            graceful: Duration::from_secs_f64(self.config.graceful_shutdown_seconds.max(0.0)),
        }
    }

    pub fn health_endpoint(&self) -> Option<&HealthEndpoint> {
        self.health_endpoint.as_ref()
    }

    /// Run the supervision loop until the child exits cleanly, the
    /// restart budget is exhausted, or a stop is requested. Returns the
    /// child's last exit code.
    pub fn run(&mut self) -> i32 {
        if let Err(e) = self.prepare() {
            eprintln!("mahi-supervisor: {e}");
            return 1;
        }

        let mut exit_code = 0;
        loop {
            if self.stop_requested() {
                break;
            }
            exit_code = self.spawn_and_monitor_child();
            if self.stop_requested() {
                break;
            }
            if exit_code == 0 {
                self.log("Child exited cleanly; stopping supervision.");
                break;
            }
            if !self.should_restart() {
                self.log("Restart budget exhausted; stopping supervision.");
                break;
            }
            let delay =
                backoff_delay(self.config.backoff_seconds, self.config.max_backoff_seconds, self.window.attempts());
            if delay > 0.0 {
                self.log(&format!("Restarting child after {delay:.1}s backoff."));
                if self.wait_interruptible(Duration::from_secs_f64(delay)) {
                    break;
                }
            } else {
                self.log("Restarting child immediately.");
            }
        }

        self.teardown();
        exit_code
    }

    fn prepare(&mut self) -> Result<(), SupervisorError> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        self.log_file = Some(Mutex::new(file));
        self.log("Supervisor starting.");

        if let Some(pid_file) = &self.pid_file {
            std::fs::write(pid_file, std::process::id().to_string())?;
        }

        if self.config.health_enabled {
            match health::HealthServer::start(
                &self.config.health_host,
                self.config.health_port,
                &self.config.health_path,
                Arc::clone(&self.health_payload),
            ) {
                Ok(server) => {
                    self.health_endpoint = Some(HealthEndpoint {
                        host: self.config.health_host.clone(),
                        port: server.addr.port(),
                        path: self.config.health_path.clone(),
                    });
                    self.health_server = Some(server);
                }
                Err(e) => self.log(&format!("Failed to start health server: {e}")),
            }
        }

        self.set_health(HealthStatus::Initializing, false, None, None);
        Ok(())
    }

    fn teardown(&mut self) {
        self.terminate_child_blocking();
        self.set_health(HealthStatus::Stopped, false, None, None);
        self.log("Supervisor stopped.");
        if let Some(mut server) = self.health_server.take() {
            server.stop();
        }
        if let Some(pid_file) = &self.pid_file {
            let _ = std::fs::remove_file(pid_file);
        }
    }

    fn spawn_and_monitor_child(&mut self) -> i32 {
        self.window.cleanup(epoch_seconds());
        self.last_start_time = Some(epoch_seconds());
        self.log(&format!("Launching child: {}", self.command.join(" ")));

        let stdio = || -> Stdio {
            match &self.log_file {
                Some(file) => match file.lock().try_clone() {
                    Ok(clone) => Stdio::from(clone),
                    Err(_) => Stdio::null(),
                },
                None => Stdio::null(),
            }
        };

        let mut command = Command::new(&self.command[0]);
        command
            .args(&self.command[1..])
            .envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .stdin(Stdio::null())
            .stdout(stdio())
            .stderr(stdio())
            // Own process group so the stop signal reaches grandchildren.
            .process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.log(&format!("Failed to launch child: {e}"));
                self.last_exit_code = Some(1);
                self.last_exit_time = Some(epoch_seconds());
                self.set_health(HealthStatus::Failed, false, None, Some(1));
                if !self.stop_requested() {
                    self.register_restart();
                }
                return 1;
            }
        };

        let pid = child.id();
        *self.shared.child_pid.lock() = Some(pid as i32);
        self.set_health(HealthStatus::Ready, true, Some(pid), None);

        let exit_code = match child.wait() {
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                self.log(&format!("Error waiting for child: {e}"));
                1
            }
        };
        *self.shared.child_pid.lock() = None;

        self.last_exit_code = Some(exit_code);
        self.last_exit_time = Some(epoch_seconds());
        self.log(&format!("Child exited with code {exit_code}."));
        let status = if exit_code == 0 { HealthStatus::Stopped } else { HealthStatus::Failed };
        self.set_health(status, false, None, Some(exit_code));

        if exit_code != 0 && !self.stop_requested() {
            self.register_restart();
        }
        exit_code
    }

    fn register_restart(&mut self) {
        self.window.record(epoch_seconds());
        self.restart_count += 1;
        self.set_health(HealthStatus::Restarting, false, None, None);
    }

    fn should_restart(&mut self) -> bool {
        if self.config.max_restarts == 0 {
            return false;
        }
        self.window.cleanup(epoch_seconds());
        self.window.attempts() < self.config.max_restarts as usize
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Returns true when the wait was interrupted by a stop request.
    fn wait_interruptible(&self, duration: Duration) -> bool {
        let mut gate = self.shared.gate.lock();
        if self.stop_requested() {
            return true;
        }
        let _ = self.shared.cond.wait_for(&mut gate, duration);
        self.stop_requested()
    }

    fn terminate_child_blocking(&self) {
        let pid = *self.shared.child_pid.lock();
        let Some(pid) = pid else { return };
        let pgid = Pid::from_raw(pid);

        self.log("Sending SIGTERM to child process group.");
        if killpg(pgid, Signal::SIGTERM).is_err() {
            return;
        }
        let deadline =
            Instant::now() + Duration::from_secs_f64(self.config.graceful_shutdown_seconds.max(0.0));
        while Instant::now() < deadline {
            if nix::sys::signal::kill(pgid, None).is_err() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        self.log("Child did not exit in time; killing.");
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    fn set_health(
        &mut self,
        status: HealthStatus,
        running: bool,
        child_pid: Option<u32>,
        exit_code: Option<i32>,
    ) {
        {
            let mut payload = self.health_payload.lock();
            *payload = HealthPayload {
                status,
                running,
                child_pid,
                restart_count: self.restart_count,
                last_exit_code: exit_code.or(self.last_exit_code),
                timestamp: epoch_seconds(),
            };
        }
        self.write_state(running, child_pid);
    }

    fn write_state(&self, running: bool, child_pid: Option<u32>) {
        let state = SupervisorState {
            timestamp: epoch_seconds(),
            running,
            child_pid: if running { child_pid } else { None },
            restart_count: self.restart_count,
            last_exit_code: self.last_exit_code,
            last_start_time: self.last_start_time,
            last_exit_time: self.last_exit_time,
            health: self.health_payload.lock().clone(),
            health_endpoint: self.health_endpoint.clone(),
        };
        if state::write_state(&self.state_file, &state).is_err() {
            self.log("Failed to write supervisor state file.");
        }
    }

    fn log(&self, message: &str) {
        let Some(file) = &self.log_file else { return };
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = file.lock();
        let _ = writeln!(file, "[supervisor {timestamp}] {message}");
        let _ = file.flush();
    }
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
