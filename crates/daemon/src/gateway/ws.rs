// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport.
//!
//! Sessions authenticate once via `?token=` on the connect URL; auth and
//! rate failures close the socket with 4401/4429. Messages on one
//! connection are handled sequentially, so responses are strict FIFO.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::proto::{parse_request, ParsedRequest, StreamResponse};
use super::{authorize, AuthOutcome, GatewayState};

pub(crate) async fn run(
    listener: TcpListener,
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
                            handle_session(stream, state, shutdown).await;
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "WS accept error"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    tracker.close();
    tracker.wait().await;
}

async fn handle_session(
    stream: TcpStream,
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
) {
    let mut token = String::new();
    let callback = |request: &Request, response: Response| {
        token = token_from_query(request.uri().query().unwrap_or_default());
        Ok(response)
    };
    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(error = %e, "WS handshake failed");
            return;
        }
    };

    match authorize(&state, &token, Some("stream")) {
        AuthOutcome::Authorized(_) => {}
        AuthOutcome::RateLimited => {
            close_with(&mut ws, 4429, "rate_limit").await;
            return;
        }
        AuthOutcome::Unauthorized | AuthOutcome::StoreError => {
            close_with(&mut ws, 4401, "unauthorized").await;
            return;
        }
    }

    if ws.send(Message::text(StreamResponse::Ready.to_json())).await.is_err() {
        return;
    }

    loop {
        let message = tokio::select! {
            message = ws.next() => message,
            _ = shutdown.cancelled() => {
                let _ = ws.close(None).await;
                break;
            }
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WS read error");
                break;
            }
            None => break,
        };

        match message {
            Message::Text(raw) => {
                let response = match parse_request(raw.as_str()) {
                    Ok(request) => dispatch(&state, request).await,
                    Err(e) => StreamResponse::Error { error: e.message() },
                };
                if ws.send(Message::text(response.to_json())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Ping/pong handled by tungstenite; binary frames ignored.
            _ => {}
        }
    }
}

async fn dispatch(state: &GatewayState, request: ParsedRequest) -> StreamResponse {
    match request {
        ParsedRequest::Ping => StreamResponse::Pong { ts: epoch_seconds() },
        ParsedRequest::Status => StreamResponse::Status { metrics: (state.metrics)() },
        ParsedRequest::Query { query, k } => {
            match state.backend.query(query, k, None).await {
                Ok(hits) => StreamResponse::QueryResult { hits },
                Err(e) => StreamResponse::Error { error: e.to_string() },
            }
        }
        ParsedRequest::Plan { goal, params } => {
            match state.backend.plan(goal, params, None).await {
                Ok(actions) => StreamResponse::PlanResult { actions },
                Err(e) => StreamResponse::Error { error: e.to_string() },
            }
        }
    }
}

async fn close_with(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    code: u16,
    reason: &'static str,
) {
    let frame = CloseFrame { code: CloseCode::Library(code), reason: reason.into() };
    let _ = ws.close(Some(frame)).await;
}

fn token_from_query(query: &str) -> String {
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return value.trim().to_string();
        }
    }
    String::new()
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
