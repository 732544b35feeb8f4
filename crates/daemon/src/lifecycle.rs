// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon composition root: startup, signal handling, shutdown.

use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use mahi_core::EndpointRegistry;

use crate::auth::{AuthError, AuthManager, TokenStore};
use crate::backend::MemoryBackend;
use crate::config::{ConfigError, DaemonConfig, LoadedConfig};
use crate::env;
use crate::gateway::{GatewayError, GatewayOptions, GatewayServer};
use crate::pool::{spawn_heartbeat, HeartbeatHandle, PoolConfig, WorkerCommand, WorkerPool};
use crate::sandbox::{SandboxConfig, SandboxError, SandboxHarness, SandboxPermissions};
use crate::telemetry;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem layout under the state directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
    pub sandbox_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            lock_path: state_dir.join("daemon.lock"),
            pid_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            sandbox_dir: state_dir.join("sandbox"),
            state_dir,
        })
    }
}

/// Install the tracing subscriber with a file appender in the state dir.
/// The returned guard must live as long as the process logs.
pub fn init_tracing(paths: &Paths) -> tracing_appender::non_blocking::WorkerGuard {
    let file = tracing_appender::rolling::never(
        &paths.state_dir,
        paths.log_path.file_name().unwrap_or_else(|| "daemon.log".as_ref()),
    );
    let (writer, guard) = tracing_appender::non_blocking(file);
    let filter = tracing_subscriber::EnvFilter::try_from_env("MAHI_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

/// Running daemon, owner of every runtime-plane subsystem.
pub struct Daemon {
    paths: Paths,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    config: DaemonConfig,
    gateway: GatewayServer,
    pool: Option<Arc<WorkerPool>>,
    heartbeat: Option<HeartbeatHandle>,
    start_time: Instant,
}

impl Daemon {
    /// Wire the registry, auth manager, backend, sandbox, pool, and
    /// gateway together. Endpoint publication happens inside gateway
    /// startup, before the caller prints the ready banner.
    pub async fn startup() -> Result<Self, LifecycleError> {
        let paths = Paths::resolve()?;
        std::fs::create_dir_all(&paths.state_dir)?;

        let lock_file = File::create(&paths.lock_path)?;
        lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
        std::fs::write(&paths.pid_path, std::process::id().to_string())?;

        let config = LoadedConfig::load(&paths.state_dir)?.daemon()?;
        info!(state_dir = %paths.state_dir.display(), "daemon starting");

        let store = TokenStore::from_settings(&config.auth.token_store)?;
        let auth = Arc::new(AuthManager::new(store, &config.auth)?);
        let registry = Arc::new(EndpointRegistry::new());

        let backend = Arc::new(MemoryBackend::new());
        let documents = {
            let backend = Arc::clone(&backend);
            Arc::new(move || backend.count()) as Arc<dyn Fn() -> u64 + Send + Sync>
        };

        let permissions = SandboxPermissions::from_settings(&config.permissions);
        let sandbox = Arc::new(SandboxHarness::new(
            SandboxConfig::from_settings(&config.sandbox, &paths.state_dir),
            permissions,
        )?);

        let pool = if config.runtime_pool.enabled {
            let command =
                WorkerCommand::new(std::env::current_exe()?, vec!["runtime-worker".to_string()]);
            let pool = Arc::new(WorkerPool::new(
                command,
                Arc::clone(&registry),
                PoolConfig::from_settings(&config.runtime_pool),
            ));
            pool.start();
            Some(pool)
        } else {
            None
        };

        let start_time = Instant::now();
        let metrics = telemetry::provider(
            start_time,
            documents,
            pool.clone(),
            Some(Arc::clone(&sandbox)),
        );

        let gateway = GatewayServer::start(
            GatewayOptions::from_settings(&config.gateway, &paths.state_dir),
            auth,
            registry,
            backend,
            metrics,
            Some(sandbox),
        )
        .await?;

        let heartbeat = pool.as_ref().map(|pool| spawn_heartbeat(Arc::clone(pool)));

        Ok(Self { paths, lock_file, config, gateway, pool, heartbeat, start_time })
    }

    /// Human-readable startup lines consumed by the CLI and the specs.
    /// Endpoints are already registered by the time this prints.
    pub fn print_banner(&self) {
        println!("HTTP gateway listening {}", self.gateway.http_url());
        println!("WS gateway listening {}", self.gateway.ws_url());
        println!("IPC gateway listening {}", self.gateway.ipc_path().display());
        let marker = if self.gateway.bootstrap_minted() { " (newly generated)" } else { "" };
        println!("Bootstrap token: {}{}", self.gateway.bootstrap_token().value, marker);
        println!("READY");
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Serve until SIGINT or SIGTERM, then stop in an orderly fashion.
    pub async fn run(self) -> Result<(), LifecycleError> {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        self.shutdown().await;
        Ok(())
    }

    /// Stop transports, then workers, then remove the runtime files.
    pub async fn shutdown(self) {
        info!("shutting down daemon");
        self.gateway.stop().await;

        if let Some(heartbeat) = self.heartbeat {
            heartbeat.stop();
        }
        if let Some(pool) = self.pool {
            pool.stop();
        }

        if self.paths.pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.pid_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }
        // Lock file is released when self.lock_file drops.
        info!("daemon shutdown complete");
    }
}
