// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-transport gateway.
//!
//! Exposes the backend operations concurrently over HTTP, WebSocket, and
//! a local stream socket. All transports share one auth manager, one
//! endpoint registry, one metrics provider, and one backend executor.
//! Startup binds each transport (ephemeral port when 0), records the
//! actual address, and publishes it into the registry; shutdown closes
//! servers in reverse order and removes the IPC socket file.

mod executor;
mod http;
mod ipc;
mod proto;
mod ws;

pub use executor::{BackendHandle, ExecError};

use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mahi_core::{Endpoint, EndpointRegistry, Protocol, Token};

use crate::auth::{AuthError, AuthManager, Usage};
use crate::backend::Backend;
use crate::config::GatewaySettings;
use crate::sandbox::SandboxHarness;
use crate::telemetry::MetricsProvider;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to bind {what} at {addr}: {source}")]
    Bind { what: &'static str, addr: String, source: std::io::Error },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Gateway I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where each transport should listen.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub http_host: String,
    pub http_port: u16,
    pub ws_host: String,
    pub ws_port: u16,
    pub ipc_path: PathBuf,
    pub http_backend_timeout: Duration,
}

impl GatewayOptions {
    pub fn from_settings(settings: &GatewaySettings, state_dir: &Path) -> Self {
        Self {
            http_host: settings.http_host.clone(),
            http_port: settings.http_port,
            ws_host: settings.ws_host.clone(),
            ws_port: settings.ws_port,
            ipc_path: settings
                .ipc_path
                .clone()
                .unwrap_or_else(|| state_dir.join("sockets").join("gateway.sock")),
            http_backend_timeout: Duration::from_secs(settings.http_backend_timeout_seconds),
        }
    }
}

/// Shared context for all transport handlers.
pub(crate) struct GatewayState {
    pub(crate) auth: Arc<AuthManager>,
    pub(crate) registry: Arc<EndpointRegistry>,
    pub(crate) backend: BackendHandle,
    pub(crate) metrics: MetricsProvider,
    pub(crate) sandbox: Option<Arc<SandboxHarness>>,
    pub(crate) http_deadline: Duration,
}

/// One auth decision, shared by every transport.
pub(crate) enum AuthOutcome {
    Authorized(Token),
    Unauthorized,
    RateLimited,
    StoreError,
}

pub(crate) fn authorize(state: &GatewayState, token: &str, scope: Option<&str>) -> AuthOutcome {
    if token.is_empty() {
        return AuthOutcome::Unauthorized;
    }
    let Some(metadata) = state.auth.validate(token, scope) else {
        return AuthOutcome::Unauthorized;
    };
    match state.auth.record_usage(token) {
        Ok(Usage::Ok) => AuthOutcome::Authorized(metadata),
        Ok(Usage::RateLimited) => AuthOutcome::RateLimited,
        Err(e) => {
            tracing::error!(error = %e, "token store failure during usage recording");
            AuthOutcome::StoreError
        }
    }
}

/// Running gateway: three bound transports plus the backend executor.
pub struct GatewayServer {
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
    http_addr: SocketAddr,
    ws_addr: SocketAddr,
    ipc_path: PathBuf,
    http_task: JoinHandle<()>,
    ws_task: JoinHandle<()>,
    ipc_task: JoinHandle<()>,
    exec_task: JoinHandle<()>,
    bootstrap: Token,
    bootstrap_minted: bool,
}

impl GatewayServer {
    pub async fn start(
        options: GatewayOptions,
        auth: Arc<AuthManager>,
        registry: Arc<EndpointRegistry>,
        backend: Arc<dyn Backend>,
        metrics: MetricsProvider,
        sandbox: Option<Arc<SandboxHarness>>,
    ) -> Result<Self, GatewayError> {
        let (bootstrap, bootstrap_minted) = auth.ensure_bootstrap()?;
        let (backend, exec_task) = BackendHandle::spawn(backend);

        let state = Arc::new(GatewayState {
            auth,
            registry: Arc::clone(&registry),
            backend,
            metrics,
            sandbox,
            http_deadline: options.http_backend_timeout,
        });
        let shutdown = CancellationToken::new();

        // HTTP
        let http_bind = format!("{}:{}", options.http_host, options.http_port);
        let http_listener = TcpListener::bind(&http_bind).await.map_err(|source| {
            GatewayError::Bind { what: "HTTP gateway", addr: http_bind.clone(), source }
        })?;
        let http_addr = http_listener.local_addr()?;
        let router = http::router(Arc::clone(&state));
        let http_shutdown = shutdown.clone();
        let http_task = tokio::spawn(async move {
            let serve = axum::serve(http_listener, router)
                .with_graceful_shutdown(http_shutdown.cancelled_owned());
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "HTTP gateway terminated");
            }
        });

        // WebSocket
        let ws_bind = format!("{}:{}", options.ws_host, options.ws_port);
        let ws_listener = TcpListener::bind(&ws_bind).await.map_err(|source| {
            GatewayError::Bind { what: "WS gateway", addr: ws_bind.clone(), source }
        })?;
        let ws_addr = ws_listener.local_addr()?;
        let ws_task =
            tokio::spawn(ws::run(ws_listener, Arc::clone(&state), shutdown.clone()));

        // Local IPC
        let ipc_path = options.ipc_path.clone();
        if ipc_path.exists() {
            let _ = std::fs::remove_file(&ipc_path);
        }
        if let Some(parent) = ipc_path.parent() {
            create_private_dir(parent)?;
        }
        let ipc_listener = UnixListener::bind(&ipc_path).map_err(|source| GatewayError::Bind {
            what: "IPC gateway",
            addr: ipc_path.display().to_string(),
            source,
        })?;
        let ipc_task =
            tokio::spawn(ipc::run(ipc_listener, Arc::clone(&state), shutdown.clone()));

        let server = Self {
            state,
            shutdown,
            http_addr,
            ws_addr,
            ipc_path,
            http_task,
            ws_task,
            ipc_task,
            exec_task,
            bootstrap,
            bootstrap_minted,
        };

        registry.register(
            Endpoint::new("gateway-http", Protocol::Http, server.http_url())
                .with_meta("token_required", json!(true)),
        );
        registry.register(
            Endpoint::new("gateway-ws", Protocol::Ws, server.ws_url())
                .with_meta("token_required", json!(true)),
        );
        registry.register(
            Endpoint::new("gateway-ipc", Protocol::Ipc, server.ipc_path.display().to_string())
                .with_meta("token_required", json!(true)),
        );

        tracing::info!(
            http = %server.http_url(),
            ws = %server.ws_url(),
            ipc = %server.ipc_path.display(),
            "gateway online"
        );
        Ok(server)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    pub fn ipc_path(&self) -> &Path {
        &self.ipc_path
    }

    pub fn bootstrap_token(&self) -> &Token {
        &self.bootstrap
    }

    /// True when the bootstrap token was minted by this process.
    pub fn bootstrap_minted(&self) -> bool {
        self.bootstrap_minted
    }

    /// Stop transports in reverse startup order, then the executor.
    pub async fn stop(self) {
        let Self { state, shutdown, ipc_path, http_task, ws_task, ipc_task, exec_task, .. } =
            self;
        shutdown.cancel();
        let _ = ipc_task.await;
        let _ = ws_task.await;
        let _ = http_task.await;

        // Dropping the last handle closes the job channel.
        drop(state);
        let _ = exec_task.await;

        let _ = std::fs::remove_file(&ipc_path);
        tracing::info!("gateway stopped");
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if path.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}
