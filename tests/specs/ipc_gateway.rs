// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local IPC socket specs: newline-delimited JSON, token-first.

use crate::prelude::DaemonInstance;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

struct IpcClient {
    writer: tokio::net::unix::OwnedWriteHalf,
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
}

impl IpcClient {
    async fn connect(daemon: &DaemonInstance, token: &str) -> Self {
        let stream = UnixStream::connect(&daemon.ipc_path).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self { writer, lines: BufReader::new(read_half).lines() };
        client.send_raw(token).await;
        client
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = self.lines.next_line().await.unwrap().expect("connection closed");
        serde_json::from_str(&line).expect("ipc payload is json")
    }
}

#[tokio::test]
async fn authenticated_session_serves_requests() {
    let daemon = DaemonInstance::launch(&[]);
    let mut client = IpcClient::connect(&daemon, &daemon.bootstrap_token).await;

    client.send_raw(r#"{"action":"status"}"#).await;
    let status = client.recv().await;
    assert!(status["metrics"]["hostname"].is_string());
    assert!(status["gateway"]["endpoints"]["ipc"].is_array());

    client.send_raw(r#"{"action":"ping"}"#).await;
    let pong = client.recv().await;
    assert!(pong["pong"].as_f64().unwrap() > 0.0);

    client.send_raw(r#"{"action":"plan","goal":"sweep"}"#).await;
    let plan = client.recv().await;
    assert!(plan["actions"].is_array());
}

#[tokio::test]
async fn each_request_gets_exactly_one_response_in_order() {
    let daemon = DaemonInstance::launch(&[]);
    let mut client = IpcClient::connect(&daemon, &daemon.bootstrap_token).await;

    client.send_raw(r#"{"action":"ping"}"#).await;
    client.send_raw(r#"{"action":"query","query":"nothing indexed"}"#).await;
    client.send_raw(r#"{"action":"ping"}"#).await;

    assert!(client.recv().await.get("pong").is_some());
    assert!(client.recv().await.get("hits").is_some());
    assert!(client.recv().await.get("pong").is_some());
}

#[tokio::test]
async fn bad_token_is_rejected_up_front() {
    let daemon = DaemonInstance::launch(&[]);
    let mut client = IpcClient::connect(&daemon, "nope").await;

    let error = client.recv().await;
    assert_eq!(error["error"], "unauthorized");
}

#[tokio::test]
async fn malformed_lines_map_to_error_objects() {
    let daemon = DaemonInstance::launch(&[]);
    let mut client = IpcClient::connect(&daemon, &daemon.bootstrap_token).await;

    client.send_raw("}{").await;
    assert_eq!(client.recv().await["error"], "invalid_json");

    client.send_raw(r#"{"action":"plan"}"#).await;
    assert_eq!(client.recv().await["error"], "goal required");

    client.send_raw(r#"{"action":"teleport"}"#).await;
    assert_eq!(client.recv().await["error"], "unsupported_action");
}
