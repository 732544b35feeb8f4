// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn endpoint(name: &str, protocol: Protocol, port: u16) -> Endpoint {
    Endpoint::new(name, protocol, format!("http://127.0.0.1:{port}"))
}

#[test]
fn register_overwrites_same_identity() {
    let registry = EndpointRegistry::new();
    registry.register(endpoint("runtime-1", Protocol::Http, 9600));
    registry.register(
        endpoint("runtime-1", Protocol::Http, 9600).with_meta("status", json!("ready")),
    );

    let found = registry.find(Protocol::Http, "runtime-1").unwrap();
    assert_eq!(found.metadata["status"], "ready");
    assert_eq!(registry.endpoints(Some(Protocol::Http)).len(), 1);
}

#[test]
fn identity_is_per_protocol() {
    let registry = EndpointRegistry::new();
    registry.register(endpoint("gateway", Protocol::Http, 8710));
    registry.register(endpoint("gateway", Protocol::Ws, 8711));

    assert_eq!(registry.endpoints(None).len(), 2);
    assert!(registry.find(Protocol::Ws, "gateway").is_some());
    assert!(registry.find(Protocol::Ipc, "gateway").is_none());
}

#[test]
fn unregister_removes_only_the_named_entry() {
    let registry = EndpointRegistry::new();
    registry.bulk_register([
        endpoint("runtime-1", Protocol::Http, 9600),
        endpoint("runtime-2", Protocol::Http, 9601),
    ]);

    assert!(registry.unregister(Protocol::Http, "runtime-1"));
    assert!(!registry.unregister(Protocol::Http, "runtime-1"));
    assert_eq!(registry.endpoints(Some(Protocol::Http)).len(), 1);
}

#[test]
fn snapshot_is_an_independent_copy() {
    let registry = EndpointRegistry::new();
    registry.register(endpoint("gateway-http", Protocol::Http, 8710));
    let snapshot = registry.snapshot();

    registry.unregister(Protocol::Http, "gateway-http");

    assert_eq!(snapshot.endpoints["http"].len(), 1);
    assert!(registry.endpoints(Some(Protocol::Http)).is_empty());
    // every protocol key is present even when empty
    for protocol in Protocol::ALL {
        assert!(snapshot.endpoints.contains_key(protocol.as_str()));
    }
}

#[test]
fn issued_tokens_authenticate_until_revoked() {
    let registry = EndpointRegistry::new();
    let token = registry.issue_token(["status", "query"]);

    assert!(registry.authenticate(&token.value, None));
    assert!(registry.authenticate(&token.value, Some("query")));
    assert!(!registry.authenticate(&token.value, Some("plan")));

    assert!(registry.revoke_token(&token.value));
    assert!(!registry.authenticate(&token.value, None));
}

#[test]
fn snapshot_lists_issued_tokens() {
    let registry = EndpointRegistry::new();
    let token = registry.issue_token(["stream"]);
    let snapshot = registry.snapshot();

    assert_eq!(snapshot.tokens.len(), 1);
    assert_eq!(snapshot.tokens[0].value, token.value);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["tokens"][0]["token"], token.value);
}
