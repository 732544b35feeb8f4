// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool specs against a live daemon: spawn, liveness, crash
//! restart on the same name and port.

use crate::prelude::DaemonInstance;
use serde_json::Value;
use serial_test::serial;
use std::io::{BufRead, BufReader, Write};
use std::time::{Duration, Instant};

const BASE_PORT: u16 = 39600;

fn pool_daemon() -> DaemonInstance {
    DaemonInstance::launch(&[
        ("MAHI_CFG__RUNTIME_POOL__ENABLED", "true"),
        ("MAHI_CFG__RUNTIME_POOL__MIN_RUNTIMES", "0"),
        ("MAHI_CFG__RUNTIME_POOL__MAX_RUNTIMES", "2"),
        ("MAHI_CFG__RUNTIME_POOL__DESIRED_RUNTIMES", "1"),
        ("MAHI_CFG__RUNTIME_POOL__BASE_PORT", "39600"),
        ("MAHI_CFG__RUNTIME_POOL__HEARTBEAT_INTERVAL_SECONDS", "0.2"),
        ("MAHI_CFG__RUNTIME_POOL__RESTART_BACKOFF_SECONDS", "0"),
        ("MAHI_CFG__RUNTIME_POOL__SHUTDOWN_TIMEOUT_SECONDS", "1"),
    ])
}

fn pool_snapshot(daemon: &DaemonInstance) -> Value {
    let body: Value = reqwest::blocking::Client::new()
        .get(daemon.http("/v1/status"))
        .bearer_auth(&daemon.bootstrap_token)
        .send()
        .unwrap()
        .json()
        .unwrap();
    body["metrics"]["runtime_pool"].clone()
}

fn wait_for_worker(daemon: &DaemonInstance, predicate: impl Fn(&Value) -> bool) -> Value {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let pool = pool_snapshot(daemon);
        if let Some(worker) = pool["workers"].as_array().and_then(|w| w.first()) {
            if predicate(worker) {
                return worker.clone();
            }
        }
        assert!(Instant::now() < deadline, "pool never satisfied predicate: {pool}");
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
#[serial]
fn worker_restarts_in_place_after_a_crash() {
    let daemon = pool_daemon();

    let worker = wait_for_worker(&daemon, |w| w["alive"] == true);
    assert_eq!(worker["name"], "runtime-1");
    assert_eq!(worker["port"], BASE_PORT);
    assert_eq!(worker["restarts"], 0);
    let first_pid = worker["pid"].as_u64().unwrap();

    // Workers answer ping on their runtime port.
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", BASE_PORT)).unwrap();
    stream.write_all(b"ping\n").unwrap();
    let mut reply = String::new();
    BufReader::new(stream.try_clone().unwrap()).read_line(&mut reply).unwrap();
    assert_eq!(reply.trim(), "pong");
    drop(stream);

    // Crash it; the next heartbeat restarts it with the same identity.
    let _ = std::process::Command::new("kill")
        .args(["-9", &first_pid.to_string()])
        .status()
        .unwrap();

    let restarted = wait_for_worker(&daemon, |w| {
        w["restarts"] == 1 && w["alive"] == true
    });
    assert_eq!(restarted["name"], "runtime-1");
    assert_eq!(restarted["port"], BASE_PORT);
    assert_ne!(restarted["pid"].as_u64().unwrap(), first_pid);

    // The registry reflects the restarted worker once the heartbeat
    // republishes its metadata.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let body: Value = reqwest::blocking::Client::new()
            .get(daemon.http("/v1/status"))
            .bearer_auth(&daemon.bootstrap_token)
            .send()
            .unwrap()
            .json()
            .unwrap();
        let endpoints = body["gateway"]["endpoints"]["http"].as_array().unwrap().clone();
        let endpoint = endpoints.iter().find(|e| e["name"] == "runtime-1").unwrap();
        assert_eq!(endpoint["address"], format!("http://127.0.0.1:{BASE_PORT}"));
        if endpoint["metadata"]["restarts"] == 1 && endpoint["metadata"]["status"] == "ready" {
            break;
        }
        assert!(Instant::now() < deadline, "registry never caught up: {endpoint}");
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
#[serial]
fn heartbeats_accumulate_pool_metrics() {
    let daemon = pool_daemon();
    wait_for_worker(&daemon, |w| w["alive"] == true);

    // Let a few heartbeats land.
    std::thread::sleep(Duration::from_millis(800));
    let pool = pool_snapshot(&daemon);

    assert_eq!(pool["desired"], 1);
    assert_eq!(pool["capacity"]["min"], 0);
    assert_eq!(pool["capacity"]["max"], 2);
    let metrics = pool["metrics"].as_array().unwrap();
    assert!(!metrics.is_empty());
    let summary = &metrics[0]["summary"];
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["alive"], 1);
}
