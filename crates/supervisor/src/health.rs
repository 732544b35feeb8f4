// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP health probe for the supervisor.
//!
//! Serves the current health payload on `/healthz`, `/health`, and the
//! configured path; 200 only while the child is `ready`, 503 otherwise.
//! Runs a single-threaded runtime on its own thread so the synchronous
//! supervisor loop stays runtime-free.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::state::{HealthPayload, HealthStatus};

#[derive(Clone)]
struct HealthState {
    payload: Arc<Mutex<HealthPayload>>,
    configured_path: String,
}

pub(crate) struct HealthServer {
    pub(crate) addr: SocketAddr,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HealthServer {
    pub(crate) fn start(
        host: &str,
        port: u16,
        configured_path: &str,
        payload: Arc<Mutex<HealthPayload>>,
    ) -> std::io::Result<Self> {
        let listener = std::net::TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let state = HealthState { payload, configured_path: configured_path.to_string() };

        let thread = std::thread::Builder::new()
            .name("supervisor-health".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!(error = %e, "health runtime failed to start");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!(error = %e, "health listener conversion failed");
                            return;
                        }
                    };
                    let app = Router::new().fallback(serve_health).with_state(state);
                    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                        let _ = stop_rx.await;
                    });
                    if let Err(e) = serve.await {
                        tracing::error!(error = %e, "health server terminated");
                    }
                });
            })?;

        Ok(Self { addr, stop: Some(stop_tx), thread: Some(thread) })
    }

    pub(crate) fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_health(State(state): State<HealthState>, uri: Uri) -> Response {
    let path = uri.path();
    if path != state.configured_path && path != "/health" && path != "/healthz" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let payload = state.payload.lock().clone();
    let code = if payload.status == HealthStatus::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(payload)).into_response()
}
