// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: launch a real `mahid` with an isolated state dir and
//! parse its startup banner for addresses and the bootstrap token.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

pub struct DaemonInstance {
    child: Child,
    pub http_url: String,
    pub ws_url: String,
    pub ipc_path: PathBuf,
    pub bootstrap_token: String,
    pub bootstrap_newly_generated: bool,
    // Held for the lifetime of the daemon; removed on drop.
    _state_dir: tempfile::TempDir,
}

impl DaemonInstance {
    /// Start `mahid` with HTTP/WS on ephemeral ports, a memory token
    /// store, and the worker pool disabled unless overridden.
    pub fn launch(extra_env: &[(&str, &str)]) -> Self {
        let state_dir = tempfile::tempdir().expect("state dir");
        let mut command = Command::new(assert_cmd::cargo::cargo_bin("mahid"));
        command
            .env("MAHI_STATE_DIR", state_dir.path())
            .env("MAHI_CFG__GATEWAY__HTTP_PORT", "0")
            .env("MAHI_CFG__GATEWAY__WS_PORT", "0")
            .env("MAHI_CFG__AUTH__TOKEN_STORE__BACKEND", "memory")
            .env("MAHI_CFG__RUNTIME_POOL__ENABLED", "false")
            .env("MAHI_CFG__SANDBOX__IDLE_PRIORITY", "false")
            .env("MAHI_CFG__SANDBOX__MAX_PROCESSES", "null")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in extra_env {
            command.env(key, value);
        }

        let mut child = command.spawn().expect("spawn mahid");
        let stdout = child.stdout.take().expect("mahid stdout");

        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                let done = line == "READY";
                if tx.send(line).is_err() || done {
                    break;
                }
            }
        });

        let mut http_url = None;
        let mut ws_url = None;
        let mut ipc_path = None;
        let mut bootstrap = None;
        let mut newly_generated = false;

        loop {
            let line = match rx.recv_timeout(Duration::from_secs(30)) {
                Ok(line) => line,
                Err(_) => {
                    let _ = child.kill();
                    panic!("mahid did not become ready within 30s");
                }
            };
            if let Some(rest) = line.strip_prefix("HTTP gateway listening ") {
                http_url = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("WS gateway listening ") {
                ws_url = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("IPC gateway listening ") {
                ipc_path = Some(PathBuf::from(rest.trim()));
            } else if let Some(rest) = line.strip_prefix("Bootstrap token: ") {
                let rest = rest.trim();
                newly_generated = rest.ends_with("(newly generated)");
                bootstrap =
                    Some(rest.split_whitespace().next().unwrap_or_default().to_string());
            } else if line == "READY" {
                break;
            }
        }

        Self {
            child,
            http_url: http_url.expect("HTTP address in banner"),
            ws_url: ws_url.expect("WS address in banner"),
            ipc_path: ipc_path.expect("IPC path in banner"),
            bootstrap_token: bootstrap.expect("bootstrap token in banner"),
            bootstrap_newly_generated: newly_generated,
            _state_dir: state_dir,
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("{}{}", self.http_url, path)
    }
}

impl Drop for DaemonInstance {
    fn drop(&mut self) {
        // SIGTERM first so the daemon exercises its orderly shutdown.
        let _ = Command::new("kill").arg(self.child.id().to_string()).status();
        for _ in 0..40 {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
