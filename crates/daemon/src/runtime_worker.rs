// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mahid runtime-worker`: the process the worker pool manages.
//!
//! Stands in for the model runtime (out of scope here): binds the TCP
//! port from `RUNTIME_PORT` and answers `ping` lines with `pong` so the
//! pool and external probes can verify liveness.

use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub fn main() -> ExitCode {
    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("runtime-worker: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn serve() -> std::io::Result<()> {
    let port: u16 = std::env::var("RUNTIME_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| std::io::Error::other("RUNTIME_PORT not set"))?;
    let name = std::env::var("RUNTIME_NAME").unwrap_or_else(|_| "runtime".to_string());

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    eprintln!("runtime worker {name} listening on 127.0.0.1:{port}");

    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let (read_half, mut writer) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = if line.trim() == "ping" { "pong\n" } else { "unknown\n" };
                if writer.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }
}
