// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor specs: health probe and restart budget.

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

fn supervisor_command(dir: &Path, extra: &[&str], child: &[&str]) -> Command {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin("mahi-supervisor"));
    command
        .arg("--log-file")
        .arg(dir.join("daemon.log"))
        .arg("--state-file")
        .arg(dir.join("supervisor_state.json"))
        .arg("--pid-file")
        .arg(dir.join("daemon.pid"))
        .args(extra)
        .arg("--")
        .args(child);
    command
}

fn read_state(dir: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(dir.join("supervisor_state.json")).ok()?;
    serde_json::from_str(&raw).ok()
}

fn wait_for_state(dir: &Path, predicate: impl Fn(&Value) -> bool) -> Value {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(state) = read_state(dir) {
            if predicate(&state) {
                return state;
            }
        }
        assert!(Instant::now() < deadline, "state never satisfied predicate");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn health_endpoint_tracks_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = supervisor_command(dir.path(), &[], &["sleep", "3"]).spawn().unwrap();

    let state = wait_for_state(dir.path(), |s| {
        s["health"]["status"] == "ready" && s["health_endpoint"].is_object()
    });
    assert_eq!(state["running"], true);
    assert!(state["child_pid"].is_u64());

    let url = format!(
        "http://{}:{}{}",
        state["health_endpoint"]["host"].as_str().unwrap(),
        state["health_endpoint"]["port"].as_u64().unwrap(),
        state["health_endpoint"]["path"].as_str().unwrap(),
    );
    let response = reqwest::blocking::get(&url).unwrap();
    assert_eq!(response.status(), 200);
    let payload: Value = response.json().unwrap();
    assert_eq!(payload["status"], "ready");
    assert_eq!(payload["running"], true);

    // /health is an accepted alias; unrelated paths are not.
    let alias = url.replace("/healthz", "/health");
    assert_eq!(reqwest::blocking::get(&alias).unwrap().status(), 200);
    let wrong = url.replace("/healthz", "/nope");
    assert_eq!(reqwest::blocking::get(&wrong).unwrap().status(), 404);

    let status = child.wait().unwrap();
    assert!(status.success());

    let state = read_state(dir.path()).unwrap();
    let final_status = state["health"]["status"].as_str().unwrap();
    assert!(final_status == "stopped" || final_status == "failed");
    assert_eq!(state["running"], false);
}

#[test]
fn restart_budget_exhausts_with_the_child_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let status = supervisor_command(
        dir.path(),
        &["--max-restarts", "3", "--backoff-seconds", "0", "--no-health"],
        &["false"],
    )
    .status()
    .unwrap();
    assert_eq!(status.code(), Some(1));

    let state = read_state(dir.path()).unwrap();
    assert_eq!(state["restart_count"], 3);
    assert_eq!(state["last_exit_code"], 1);
    assert_eq!(state["health"]["status"], "stopped");

    let log = std::fs::read_to_string(dir.path().join("daemon.log")).unwrap();
    assert!(log.contains("Restart budget exhausted"));
    // PID file is cleared on teardown.
    assert!(!dir.path().join("daemon.pid").exists());
}

#[test]
fn sigterm_stops_the_supervisor_and_child() {
    let dir = tempfile::tempdir().unwrap();
    let mut child =
        supervisor_command(dir.path(), &["--no-health"], &["sleep", "30"]).spawn().unwrap();

    wait_for_state(dir.path(), |s| s["health"]["status"] == "ready");
    let _ = Command::new("kill").arg(child.id().to_string()).status().unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            // Stop path: child was signalled, supervisor exits with its code.
            assert!(status.code().is_some());
            break;
        }
        assert!(Instant::now() < deadline, "supervisor did not exit after SIGTERM");
        std::thread::sleep(Duration::from_millis(50));
    }

    let state = wait_for_state(dir.path(), |s| s["health"]["status"] == "stopped");
    assert_eq!(state["running"], false);
}

#[test]
fn supervised_daemon_survives_a_crash() {
    // Supervise the actual daemon binary and kill it once; the supervisor
    // brings it back within the restart budget.
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("mahi-state");
    let daemon_bin = assert_cmd::cargo::cargo_bin("mahid");

    let mut supervisor = {
        let mut command = supervisor_command(
            dir.path(),
            &["--backoff-seconds", "0", "--no-health"],
            &[daemon_bin.to_str().unwrap()],
        );
        command
            .env("MAHI_STATE_DIR", &state_dir)
            .env("MAHI_CFG__GATEWAY__HTTP_PORT", "0")
            .env("MAHI_CFG__GATEWAY__WS_PORT", "0")
            .env("MAHI_CFG__AUTH__TOKEN_STORE__BACKEND", "memory")
            .env("MAHI_CFG__RUNTIME_POOL__ENABLED", "false");
        command.spawn().unwrap()
    };

    let state = wait_for_state(dir.path(), |s| s["health"]["status"] == "ready");
    let first_pid = state["child_pid"].as_u64().unwrap();

    let _ = Command::new("kill").args(["-9", &first_pid.to_string()]).status().unwrap();

    let state = wait_for_state(dir.path(), |s| {
        s["health"]["status"] == "ready" && s["restart_count"] == 1
    });
    assert_ne!(state["child_pid"].as_u64().unwrap(), first_pid);

    let _ = Command::new("kill").arg(supervisor.id().to_string()).status().unwrap();
    let _ = supervisor.wait();
}
