// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket session specs.

use crate::prelude::DaemonInstance;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        let message = ws.next().await.expect("ws stream ended").expect("ws read failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("ws payload is json");
        }
    }
}

#[tokio::test]
async fn session_ready_ping_query() {
    let daemon = DaemonInstance::launch(&[]);
    let url = format!("{}/?token={}", daemon.ws_url, daemon.bootstrap_token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["type"], "ready");

    ws.send(Message::text(r#"{"action":"ping"}"#)).await.unwrap();
    let pong = next_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["ts"].as_f64().unwrap() > 0.0);

    ws.send(Message::text(r#"{"action":"query","query":"x"}"#)).await.unwrap();
    let result = next_json(&mut ws).await;
    assert_eq!(result["type"], "query_result");
    assert!(result["hits"].is_array());

    ws.send(Message::text(r#"{"action":"status"}"#)).await.unwrap();
    let status = next_json(&mut ws).await;
    assert_eq!(status["type"], "status");
    assert!(status["metrics"]["hostname"].is_string());

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn responses_are_fifo_within_a_session() {
    let daemon = DaemonInstance::launch(&[]);
    let url = format!("{}/?token={}", daemon.ws_url, daemon.bootstrap_token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _ready = next_json(&mut ws).await;

    ws.send(Message::text(r#"{"action":"query","query":"a"}"#)).await.unwrap();
    ws.send(Message::text(r#"{"action":"ping"}"#)).await.unwrap();
    ws.send(Message::text(r#"{"action":"plan","goal":"b"}"#)).await.unwrap();

    assert_eq!(next_json(&mut ws).await["type"], "query_result");
    assert_eq!(next_json(&mut ws).await["type"], "pong");
    assert_eq!(next_json(&mut ws).await["type"], "plan_result");
}

#[tokio::test]
async fn invalid_token_closes_with_4401() {
    let daemon = DaemonInstance::launch(&[]);
    let url = format!("{}/?token=bogus", daemon.ws_url);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let frame = loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close, got {other:?}"),
        }
    };
    assert_eq!(frame.unwrap().code, CloseCode::Library(4401));
}

#[tokio::test]
async fn malformed_messages_get_error_replies() {
    let daemon = DaemonInstance::launch(&[]);
    let url = format!("{}/?token={}", daemon.ws_url, daemon.bootstrap_token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let _ready = next_json(&mut ws).await;

    ws.send(Message::text("{broken")).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"], "invalid_json");

    ws.send(Message::text(r#"{"action":"query"}"#)).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["error"], "query required");

    ws.send(Message::text(r#"{"action":"fly"}"#)).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["error"], "unsupported_action");
}
