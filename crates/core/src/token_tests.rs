// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn token(scopes: &[&str], expires_at: Option<u64>) -> Token {
    Token {
        value: generate_token_value(),
        subject: "test".to_string(),
        scopes: canonical_scopes(scopes.iter()),
        issued_at: 1_000,
        expires_at,
        admin: false,
        rate_limit_per_minute: 120,
        last_used_at: None,
        window_start: 0,
        window_count: 0,
    }
}

#[test]
fn generated_values_are_distinct_and_urlsafe() {
    let a = generate_token_value();
    let b = generate_token_value();
    assert_ne!(a, b);
    // 32 bytes, unpadded url-safe base64
    assert_eq!(a.len(), 43);
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn scopes_are_trimmed_deduped_and_sorted() {
    let scopes = canonical_scopes(["query", " index ", "query", ""]);
    let ordered: Vec<&str> = scopes.iter().map(String::as_str).collect();
    assert_eq!(ordered, vec!["index", "query"]);
}

#[test]
fn wildcard_matches_any_scope() {
    let t = token(&["*"], None);
    assert!(t.has_scope("status"));
    assert!(t.has_scope("anything-at-all"));

    let t = token(&["query"], None);
    assert!(t.has_scope("query"));
    assert!(!t.has_scope("index"));
}

#[test]
fn expiry_is_inclusive_at_the_deadline() {
    let t = token(&["query"], Some(5_000));
    assert!(!t.is_expired(4_999));
    assert!(t.is_expired(5_000));
    assert!(t.is_expired(5_001));

    let forever = token(&["query"], None);
    assert!(!forever.is_expired(u64::MAX));
}

#[test]
fn bootstrap_class_requires_admin_and_no_expiry() {
    let mut t = token(&["*"], None);
    t.admin = true;
    assert!(t.is_bootstrap_class());

    t.expires_at = Some(10);
    assert!(!t.is_bootstrap_class());
}

#[test]
fn window_fields_round_trip_through_serde() {
    let mut t = token(&["status"], Some(9_000));
    t.window_start = 1_234;
    t.window_count = 7;
    let json = serde_json::to_string(&t).unwrap();
    let back: Token = serde_json::from_str(&json).unwrap();
    assert_eq!(back, t);
}
