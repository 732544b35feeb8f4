// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime process pool.
//!
//! Keeps `desired` worker processes alive within `[min, max]`, allocates
//! each a unique TCP port, publishes their endpoints into the registry,
//! and records a rolling window of heartbeat snapshots. The pool mutex
//! guards bookkeeping only; killing and waiting happen after the process
//! identity has been taken out of the map.

mod health;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use thiserror::Error;

use mahi_core::{Endpoint, EndpointRegistry, Protocol};

use crate::config::PoolSettings;

/// Snapshot ring depth.
const METRICS_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Maximum runtime capacity reached")]
    CapacityExceeded,

    #[error("Worker '{0}' already exists")]
    NameConflict(String),

    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn { name: String, source: std::io::Error },
}

/// Pool sizing and timing knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: usize,
    /// Zero means unbounded.
    pub max: usize,
    pub desired: Option<usize>,
    pub base_port: u16,
    pub heartbeat_interval: Duration,
    pub restart_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 2,
            desired: None,
            base_port: 9600,
            heartbeat_interval: Duration::from_secs(5),
            restart_backoff: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self {
            min: settings.min_runtimes,
            max: settings.max_runtimes,
            desired: settings.desired_runtimes,
            base_port: settings.base_port,
            heartbeat_interval: Duration::from_secs_f64(
                settings.heartbeat_interval_seconds.max(0.0),
            ),
            restart_backoff: Duration::from_secs_f64(settings.restart_backoff_seconds.max(0.0)),
            shutdown_timeout: Duration::from_secs_f64(settings.shutdown_timeout_seconds.max(0.0)),
        }
    }
}

/// Program the pool launches for each worker. Workers learn their
/// identity from `RUNTIME_PORT`/`RUNTIME_NAME`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

/// Book-keeping for one managed runtime worker.
struct WorkerProcess {
    name: String,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    port: u16,
    child: Child,
    started: Instant,
    started_at_ms: u64,
    restarts: u32,
    last_health: Option<Value>,
}

impl WorkerProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }
}

struct Inner {
    workers: IndexMap<String, WorkerProcess>,
    port_cursor: u16,
    desired: usize,
    metrics: VecDeque<Value>,
}

/// Coordinate automation daemon worker processes.
pub struct WorkerPool {
    command: WorkerCommand,
    registry: Arc<EndpointRegistry>,
    config: PoolConfig,
    inner: Mutex<Inner>,
    sys: Mutex<System>,
}

impl WorkerPool {
    pub fn new(
        command: WorkerCommand,
        registry: Arc<EndpointRegistry>,
        config: PoolConfig,
    ) -> Self {
        let desired = bound_capacity(config.desired.unwrap_or(config.min), &config);
        Self {
            command,
            registry,
            inner: Mutex::new(Inner {
                workers: IndexMap::new(),
                port_cursor: config.base_port,
                desired,
                metrics: VecDeque::with_capacity(METRICS_CAPACITY),
            }),
            sys: Mutex::new(System::new()),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Bring the pool up to its initial desired capacity.
    pub fn start(&self) {
        self.ensure_capacity();
    }

    /// Terminate and unregister every worker.
    pub fn stop(&self) {
        let procs: Vec<WorkerProcess> = {
            let mut inner = self.inner.lock();
            inner.workers.drain(..).map(|(_, proc)| proc).collect()
        };
        for proc in procs {
            self.stop_process(proc, true);
        }
    }

    /// Spawn one worker. Auto-named workers use `runtime-<N>`; explicit
    /// names and ports belong to the caller.
    pub fn spawn(
        &self,
        name: Option<&str>,
        extra_env: Option<&BTreeMap<String, String>>,
        port: Option<u16>,
    ) -> Result<(String, u32, u16), PoolError> {
        let spawned = {
            let mut inner = self.inner.lock();
            let info = self.spawn_locked(&mut inner, name, extra_env, port, 0)?;
            inner.desired = inner.desired.max(inner.workers.len());
            info
        };
        tracing::info!(worker = %spawned.0, pid = spawned.1, port = spawned.2, "spawned runtime worker");
        Ok(spawned)
    }

    /// Remove a worker by name. Returns false for unknown names.
    pub fn remove(&self, name: &str) -> bool {
        let proc = {
            let mut inner = self.inner.lock();
            let proc = inner.workers.shift_remove(name);
            if proc.is_some() {
                inner.desired = self.config.min.max(inner.desired.min(inner.workers.len()));
            }
            proc
        };
        match proc {
            Some(proc) => {
                self.stop_process(proc, true);
                true
            }
            None => false,
        }
    }

    pub fn scale_to(&self, desired: usize) {
        {
            let mut inner = self.inner.lock();
            inner.desired = bound_capacity(desired, &self.config);
        }
        self.ensure_capacity();
    }

    pub fn desired_capacity(&self) -> usize {
        self.inner.lock().desired
    }

    pub fn active_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0usize;
        for w in inner.workers.values_mut() {
            if w.is_alive() {
                count += 1;
            }
        }
        count
    }

    /// Periodic maintenance pass: reconcile capacity, restart crashed
    /// workers in place, then record per-worker health. Endpoint state is
    /// published before the summary lands in the ring buffer.
    pub fn heartbeat(&self) {
        self.ensure_capacity();
        self.restart_dead();
        self.collect_health();
    }

    /// Serializable dump for status responses.
    pub fn snapshot(&self) -> Value {
        let mut inner = self.inner.lock();
        let desired = inner.desired;
        let metrics: Vec<Value> = inner.metrics.iter().cloned().collect();
        let mut workers = Vec::with_capacity(inner.workers.len());
        let mut active = 0;
        for proc in inner.workers.values_mut() {
            let alive = proc.is_alive();
            if alive {
                active += 1;
            }
            workers.push(describe(proc, alive));
        }
        json!({
            "workers": workers,
            "metrics": metrics,
            "desired": desired,
            "active": active,
            "capacity": { "min": self.config.min, "max": self.config.max },
        })
    }

    fn ensure_capacity(&self) {
        // Top up.
        loop {
            let spawned = {
                let mut inner = self.inner.lock();
                if inner.workers.len() >= inner.desired {
                    break;
                }
                self.spawn_locked(&mut inner, None, None, None, 0)
            };
            match spawned {
                Ok((name, pid, port)) => {
                    tracing::info!(worker = %name, pid, port, "spawned runtime worker")
                }
                Err(e) => {
                    // Not retried in this pass; the next heartbeat tries again.
                    tracing::warn!(error = %e, "worker spawn failed");
                    break;
                }
            }
        }

        // Shrink, evicting the most recently started worker first.
        loop {
            let victim = {
                let mut inner = self.inner.lock();
                if inner.workers.len() <= inner.desired {
                    break;
                }
                let youngest = inner
                    .workers
                    .values()
                    .max_by_key(|w| w.started_at_ms)
                    .map(|w| w.name.clone());
                youngest.and_then(|name| inner.workers.shift_remove(&name))
            };
            match victim {
                Some(proc) => self.stop_process(proc, true),
                None => break,
            }
        }
    }

    fn restart_dead(&self) {
        let dead: Vec<WorkerProcess> = {
            let mut inner = self.inner.lock();
            let mut names: Vec<String> = Vec::new();
            for w in inner.workers.values_mut() {
                if !w.is_alive() {
                    names.push(w.name.clone());
                }
            }
            names.into_iter().filter_map(|name| inner.workers.shift_remove(&name)).collect()
        };

        for proc in dead {
            let name = proc.name.clone();
            let port = proc.port;
            let env = proc.env.clone();
            let restarts = proc.restarts;
            self.stop_process(proc, true);

            if !self.config.restart_backoff.is_zero() {
                std::thread::sleep(self.config.restart_backoff);
            }

            let respawned = {
                let mut inner = self.inner.lock();
                self.spawn_locked(&mut inner, Some(&name), Some(&env), Some(port), restarts + 1)
            };
            match respawned {
                Ok((name, pid, port)) => {
                    tracing::info!(worker = %name, pid, port, restarts = restarts + 1, "restarted runtime worker")
                }
                Err(e) => tracing::warn!(worker = %name, error = %e, "worker restart failed"),
            }
        }
    }

    fn collect_health(&self) {
        let now_ms = epoch_ms();
        let mut entries: Vec<(String, u32, bool, f64, u32, u16)> = Vec::new();
        {
            let mut inner = self.inner.lock();
            for proc in inner.workers.values_mut() {
                let alive = proc.is_alive();
                entries.push((
                    proc.name.clone(),
                    proc.pid(),
                    alive,
                    proc.started.elapsed().as_secs_f64(),
                    proc.restarts,
                    proc.port,
                ));
            }
        }
        if entries.is_empty() {
            return;
        }

        let healths: Vec<(String, Value)> = {
            let mut sys = self.sys.lock();
            let pids: Vec<u32> =
                entries.iter().filter(|e| e.2).map(|e| e.1).collect();
            health::refresh(&mut sys, &pids);
            entries
                .iter()
                .map(|(name, pid, alive, uptime, restarts, port)| {
                    let value = health::describe(
                        &sys, name, *pid, *alive, *uptime, *restarts, *port, now_ms,
                    );
                    (name.clone(), value)
                })
                .collect()
        };

        let mut alive_count = 0usize;
        let mut total_restarts = 0u64;
        let mut workers_snapshot = serde_json::Map::new();
        {
            let mut inner = self.inner.lock();
            for (name, health) in &healths {
                if let Some(proc) = inner.workers.get_mut(name) {
                    proc.last_health = Some(health.clone());
                }
                workers_snapshot.insert(name.clone(), health.clone());
                if health["alive"].as_bool().unwrap_or(false) {
                    alive_count += 1;
                }
                total_restarts += health["restarts"].as_u64().unwrap_or(0);
            }
        }

        // Republish endpoint metadata so status reflects reality.
        for (name, health) in &healths {
            let alive = health["alive"].as_bool().unwrap_or(false);
            let port = health["port"].as_u64().unwrap_or(0);
            let endpoint =
                Endpoint::new(name.clone(), Protocol::Http, format!("http://127.0.0.1:{port}"))
                    .with_meta("status", json!(if alive { "ready" } else { "stopped" }))
                    .with_meta("pid", health["pid"].clone())
                    .with_meta("restarts", health["restarts"].clone())
                    .with_meta("cpu_percent", health["cpu_percent"].clone())
                    .with_meta("memory_rss", health["memory_rss"].clone());
            self.registry.register(endpoint);
        }

        let total = workers_snapshot.len();
        let summary = json!({
            "timestamp": now_ms,
            "desired": self.desired_capacity(),
            "total": total,
            "alive": alive_count,
            "dead": total - alive_count,
            "restarts": total_restarts,
        });
        let mut inner = self.inner.lock();
        inner.metrics.push_front(json!({ "summary": summary, "workers": workers_snapshot }));
        inner.metrics.truncate(METRICS_CAPACITY);
    }

    fn spawn_locked(
        &self,
        inner: &mut Inner,
        name: Option<&str>,
        extra_env: Option<&BTreeMap<String, String>>,
        port: Option<u16>,
        restarts: u32,
    ) -> Result<(String, u32, u16), PoolError> {
        if self.config.max > 0 && inner.workers.len() >= self.config.max {
            return Err(PoolError::CapacityExceeded);
        }

        let worker_name = match name {
            Some(name) => {
                if inner.workers.contains_key(name) {
                    return Err(PoolError::NameConflict(name.to_string()));
                }
                name.to_string()
            }
            None => {
                // runtime-<len+1>, skipping names still held by live workers.
                let mut index = inner.workers.len() + 1;
                while inner.workers.contains_key(&format!("runtime-{index}")) {
                    index += 1;
                }
                format!("runtime-{index}")
            }
        };

        let assigned_port = match port {
            Some(port) => {
                inner.port_cursor = inner.port_cursor.max(port.saturating_add(1));
                port
            }
            None => {
                let port = inner.port_cursor;
                inner.port_cursor = inner.port_cursor.saturating_add(1);
                port
            }
        };

        let mut env: BTreeMap<String, String> = extra_env.cloned().unwrap_or_default();
        env.insert("RUNTIME_PORT".to_string(), assigned_port.to_string());
        env.insert("RUNTIME_NAME".to_string(), worker_name.clone());

        let cwd = self
            .command
            .program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .current_dir(&cwd)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PoolError::Spawn { name: worker_name.clone(), source })?;

        let pid = child.id();
        let mut command = vec![self.command.program.display().to_string()];
        command.extend(self.command.args.iter().cloned());

        let proc = WorkerProcess {
            name: worker_name.clone(),
            command,
            env,
            port: assigned_port,
            child,
            started: Instant::now(),
            started_at_ms: epoch_ms(),
            restarts,
            last_health: None,
        };
        inner.workers.insert(worker_name.clone(), proc);

        self.registry.register(
            Endpoint::new(
                worker_name.clone(),
                Protocol::Http,
                format!("http://127.0.0.1:{assigned_port}"),
            )
            .with_meta("status", json!("booting"))
            .with_meta("pid", json!(pid))
            .with_meta("port", json!(assigned_port))
            .with_meta("restarts", json!(restarts)),
        );

        Ok((worker_name, pid, assigned_port))
    }

    fn stop_process(&self, mut proc: WorkerProcess, unregister: bool) {
        if proc.is_alive() {
            let pid = nix::unistd::Pid::from_raw(proc.pid() as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);

            let deadline = Instant::now() + self.config.shutdown_timeout;
            while proc.is_alive() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(25));
            }
            if proc.is_alive() {
                let _ = proc.child.kill();
            }
        }
        let _ = proc.child.wait();

        if unregister {
            self.registry.unregister(Protocol::Http, &proc.name);
        }
    }
}

fn describe(proc: &WorkerProcess, alive: bool) -> Value {
    let mut base = json!({
        "name": proc.name,
        "pid": proc.pid(),
        "alive": alive,
        "uptime": proc.started.elapsed().as_secs_f64(),
        "restarts": proc.restarts,
        "port": proc.port,
        "command": proc.command,
    });
    if let Some(health) = &proc.last_health {
        if let (Some(base_map), Some(health_map)) = (base.as_object_mut(), health.as_object()) {
            for (key, value) in health_map {
                if key != "name" {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
    }
    base
}

fn bound_capacity(desired: usize, config: &PoolConfig) -> usize {
    let mut desired = desired.max(config.min);
    if config.max > 0 {
        desired = desired.min(config.max);
    }
    desired
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Handle to the periodic heartbeat thread.
pub struct HeartbeatHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drive `pool.heartbeat()` on its own thread at the configured interval.
pub fn spawn_heartbeat(pool: Arc<WorkerPool>) -> HeartbeatHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let interval = pool.config().heartbeat_interval.max(Duration::from_millis(100));
    let thread = std::thread::Builder::new()
        .name("pool-heartbeat".to_string())
        .spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                pool.heartbeat();
                let mut waited = Duration::ZERO;
                while waited < interval && !flag.load(Ordering::Relaxed) {
                    let step = Duration::from_millis(50).min(interval - waited);
                    std::thread::sleep(step);
                    waited += step;
                }
            }
        })
        .ok();
    HeartbeatHandle { stop, thread }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
