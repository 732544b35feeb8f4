// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local IPC transport: newline-delimited JSON over a Unix stream
//! socket.
//!
//! The first line of a connection is the token; authentication is
//! session-level, with no per-message scope check. Every request line
//! receives exactly one newline-terminated JSON response, in order.

use mahi_core::ErrorKind;
use serde_json::{json, Value};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::env;

use super::proto::{parse_request, ParsedRequest};
use super::{authorize, AuthOutcome, GatewayState};

pub(crate) async fn run(
    listener: UnixListener,
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
) {
    let tracker = TaskTracker::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&state);
                        let shutdown = shutdown.clone();
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, state, shutdown).await {
                                tracing::debug!(error = %e, "IPC connection error");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "IPC accept error"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    tracker.close();
    tracker.wait().await;
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // First line is the token.
    let token = match tokio::time::timeout(env::ipc_timeout(), lines.next_line()).await {
        Ok(Ok(Some(line))) => line.trim().to_string(),
        _ => return Ok(()),
    };

    match authorize(&state, &token, None) {
        AuthOutcome::Authorized(_) => {}
        AuthOutcome::RateLimited => {
            return write_error(&mut writer, ErrorKind::RateLimitExceeded).await;
        }
        AuthOutcome::Unauthorized => {
            return write_error(&mut writer, ErrorKind::Unauthorized).await;
        }
        AuthOutcome::StoreError => {
            return write_error(&mut writer, ErrorKind::TokenStoreError).await;
        }
    }

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match parse_request(&line) {
            Ok(request) => dispatch(&state, request).await,
            Err(e) => json!({ "error": e.message() }),
        };
        write_line(&mut writer, &response).await?;
    }
    Ok(())
}

async fn dispatch(state: &GatewayState, request: ParsedRequest) -> Value {
    match request {
        ParsedRequest::Ping => json!({ "pong": epoch_seconds() }),
        ParsedRequest::Status => {
            json!({ "metrics": (state.metrics)(), "gateway": state.registry.snapshot() })
        }
        ParsedRequest::Query { query, k } => match state.backend.query(query, k, None).await {
            Ok(hits) => json!({ "hits": hits }),
            Err(e) => json!({ "error": e.to_string() }),
        },
        ParsedRequest::Plan { goal, params } => {
            match state.backend.plan(goal, params, None).await {
                Ok(actions) => json!({ "actions": actions }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
    }
}

async fn write_line(
    writer: &mut (impl AsyncWriteExt + Unpin),
    payload: &Value,
) -> std::io::Result<()> {
    let mut line = payload.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn write_error(
    writer: &mut (impl AsyncWriteExt + Unpin),
    kind: ErrorKind,
) -> std::io::Result<()> {
    write_line(writer, &json!({ "error": kind.as_str() })).await
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
