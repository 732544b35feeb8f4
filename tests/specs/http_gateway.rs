// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP gateway round-trip, auth, and rate-limit specs.

use crate::prelude::DaemonInstance;
use serde_json::{json, Value};

#[test]
fn index_then_query_round_trip() {
    let daemon = DaemonInstance::launch(&[]);
    assert!(daemon.bootstrap_newly_generated);
    let client = reqwest::blocking::Client::new();

    let indexed: Value = client
        .post(daemon.http("/v1/index"))
        .bearer_auth(&daemon.bootstrap_token)
        .json(&json!({ "text": "hello world", "source": "t" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let doc_id = indexed["doc_id"].as_str().unwrap().to_string();
    assert!(!doc_id.is_empty());

    let queried: Value = client
        .post(daemon.http("/v1/query"))
        .bearer_auth(&daemon.bootstrap_token)
        .json(&json!({ "query": "hello", "k": 1 }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let hit = &queried["hits"][0];
    assert_eq!(hit["doc_id"], doc_id.as_str());
    assert!(hit["score"].as_f64().unwrap() >= 0.5);
    assert_eq!(hit["text"], "hello world");
}

#[test]
fn plan_returns_actions() {
    let daemon = DaemonInstance::launch(&[]);
    let client = reqwest::blocking::Client::new();

    let planned: Value = client
        .post(daemon.http("/v1/plan"))
        .bearer_auth(&daemon.bootstrap_token)
        .json(&json!({ "goal": "collect mail then file it" }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let actions = planned["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    for action in actions {
        assert!(action["name"].is_string());
        assert!(action["sensitive"].is_boolean());
        assert!(action["preview_required"].is_boolean());
    }
}

#[test]
fn missing_and_invalid_tokens_are_unauthorized() {
    let daemon = DaemonInstance::launch(&[]);
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(daemon.http("/v1/query"))
        .json(&json!({ "query": "hello" }))
        .send()
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "unauthorized");

    let response = client
        .post(daemon.http("/v1/query"))
        .bearer_auth("definitely-not-a-token")
        .json(&json!({ "query": "hello" }))
        .send()
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[test]
fn rate_limit_trips_on_the_fourth_status_call() {
    let daemon =
        DaemonInstance::launch(&[("MAHI_CFG__AUTH__RATE_LIMIT_PER_MINUTE", "3")]);
    let client = reqwest::blocking::Client::new();

    let mut statuses = Vec::new();
    for call in 0..4 {
        let response = client
            .get(daemon.http("/v1/status"))
            .bearer_auth(&daemon.bootstrap_token)
            .send()
            .unwrap();
        statuses.push(response.status().as_u16());
        if call == 3 {
            let body: Value = response.json().unwrap();
            assert_eq!(body["error"], "rate_limit_exceeded");
        }
    }
    assert_eq!(statuses, [200, 200, 200, 429]);
}

#[test]
fn status_reports_metrics_and_registry() {
    let daemon = DaemonInstance::launch(&[]);

    let body: Value = reqwest::blocking::Client::new()
        .get(daemon.http("/v1/status"))
        .header("X-Mahi-Token", &daemon.bootstrap_token)
        .send()
        .unwrap()
        .json()
        .unwrap();

    assert!(body["metrics"]["uptime_seconds"].as_f64().unwrap() >= 0.0);
    assert!(body["metrics"]["sandbox"]["permissions"].is_object());
    let endpoints = &body["gateway"]["endpoints"];
    for protocol in ["http", "ws", "ipc"] {
        let list = endpoints[protocol].as_array().unwrap();
        assert!(
            list.iter().any(|e| e["metadata"]["token_required"] == json!(true)),
            "missing gateway endpoint for {protocol}"
        );
    }
}
