// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox specs through the daemon's execute endpoint.

use crate::prelude::DaemonInstance;
use serde_json::{json, Value};

fn execute(daemon: &DaemonInstance, payload: Value) -> reqwest::blocking::Response {
    reqwest::blocking::Client::new()
        .post(daemon.http("/v1/execute"))
        .bearer_auth(&daemon.bootstrap_token)
        .json(&payload)
        .send()
        .unwrap()
}

#[test]
fn echo_runs_inside_the_sandbox() {
    let daemon = DaemonInstance::launch(&[]);

    let body: Value = execute(&daemon, json!({ "action": "echo", "args": ["hi"] }))
        .json()
        .unwrap();
    let result = &body["result"];
    assert_eq!(result["success"], true);
    assert_eq!(result["timed_out"], false);
    assert_eq!(result["value"]["args"], json!(["hi"]));
    assert!(result["limits"]["cpu_time"]["soft"].is_number());
}

#[test]
fn wall_clock_cap_times_the_action_out() {
    let daemon = DaemonInstance::launch(&[("MAHI_CFG__SANDBOX__WALL_TIME_SECONDS", "0.2")]);

    let body: Value = execute(
        &daemon,
        json!({ "action": "time:sleep", "kwargs": { "seconds": 1.0 } }),
    )
    .json()
    .unwrap();
    let result = &body["result"];
    assert_eq!(result["success"], false);
    assert_eq!(result["timed_out"], true);
    assert!(result["value"].is_null());
    assert_eq!(result["error"], "Timed out waiting for sandbox action");
}

#[test]
fn network_access_is_disabled_by_default() {
    let daemon = DaemonInstance::launch(&[]);

    let body: Value = execute(
        &daemon,
        json!({ "action": "net:connect", "kwargs": { "host": "127.0.0.1", "port": 9 } }),
    )
    .json()
    .unwrap();
    let result = &body["result"];
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("Network access is disabled"));
}

#[test]
fn file_access_is_fenced_to_the_workdir() {
    let daemon = DaemonInstance::launch(&[]);

    let denied: Value = execute(
        &daemon,
        json!({ "action": "fs:write", "kwargs": { "path": "/tmp/mahi-escape.txt", "text": "x" } }),
    )
    .json()
    .unwrap();
    assert_eq!(denied["result"]["success"], false);
    assert!(denied["result"]["error"]
        .as_str()
        .unwrap()
        .contains("File system access is restricted"));

    let allowed: Value = execute(
        &daemon,
        json!({ "action": "fs:write", "kwargs": { "path": "inside.txt", "text": "ok" } }),
    )
    .json()
    .unwrap();
    assert_eq!(allowed["result"]["success"], true);
    assert_eq!(allowed["result"]["value"], "ok");
}

#[test]
fn missing_permission_is_refused() {
    let daemon = DaemonInstance::launch(&[]);

    let response = execute(&daemon, json!({ "action": "shell:run", "kwargs": { "command": "id" } }));
    assert_eq!(response.status(), 403);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "permission_denied");
}

#[test]
fn unknown_action_is_not_found() {
    let daemon = DaemonInstance::launch(&[]);

    let response = execute(&daemon, json!({ "action": "rockets:launch" }));
    assert_eq!(response.status(), 404);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "not_found");
}
