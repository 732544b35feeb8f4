// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn missing_file_yields_defaults() {
    let config = LoadedConfig::from_sources(None, vars(&[])).unwrap();
    let daemon = config.daemon().unwrap();
    assert_eq!(daemon.gateway.http_port, 8710);
    assert_eq!(daemon.auth.rate_limit_per_minute, 120);
    assert_eq!(daemon.runtime_pool.base_port, 9600);
    assert!(!daemon.permissions.file_access);
}

#[test]
fn file_values_override_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[gateway]
http_port = 0
ws_port = 0

[runtime_pool]
max_runtimes = 4
"#,
    )
    .unwrap();

    let config = LoadedConfig::from_sources(Some(&path), vars(&[])).unwrap();
    let daemon = config.daemon().unwrap();
    assert_eq!(daemon.gateway.http_port, 0);
    assert_eq!(daemon.runtime_pool.max_runtimes, 4);
    // untouched sections keep defaults
    assert_eq!(daemon.sandbox.cpu_time_seconds, 5);
}

#[test]
fn dotted_env_override_applies() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[permissions]\nfile_access = false\n").unwrap();

    let config = LoadedConfig::from_sources(
        Some(&path),
        vars(&[
            ("MAHI_CFG__PERMISSIONS__FILE_ACCESS", "true"),
            ("MAHI_CFG__GATEWAY__HTTP_PORT", "9000"),
        ]),
    )
    .unwrap();
    let daemon = config.daemon().unwrap();
    assert!(daemon.permissions.file_access);
    assert_eq!(daemon.gateway.http_port, 9000);
}

#[test]
fn json_override_payload_merges_deeply() {
    let config = LoadedConfig::from_sources(
        None,
        vars(&[(
            "MAHI_CONFIG_OVERRIDES",
            r#"{"permissions": {"file_access": true}, "runtime_pool": {"enabled": false}}"#,
        )]),
    )
    .unwrap();
    let daemon = config.daemon().unwrap();
    assert!(daemon.permissions.file_access);
    assert!(!daemon.runtime_pool.enabled);
}

#[test]
fn dotted_override_wins_over_json_blob() {
    let config = LoadedConfig::from_sources(
        None,
        vars(&[
            ("MAHI_CONFIG_OVERRIDES", r#"{"gateway": {"http_port": 1}}"#),
            ("MAHI_CFG__GATEWAY__HTTP_PORT", "2"),
        ]),
    )
    .unwrap();
    assert_eq!(config.daemon().unwrap().gateway.http_port, 2);
}

#[test]
fn secret_override_is_not_persistable() {
    let config = LoadedConfig::from_sources(
        None,
        vars(&[
            ("MAHI_SECRET__AUTH__TOKEN_STORE__KEYRING_SERVICE", "secret-service"),
            ("MAHI_CFG__AUTH__RATE_LIMIT_PER_MINUTE", "7"),
        ]),
    )
    .unwrap();

    let daemon = config.daemon().unwrap();
    assert_eq!(daemon.auth.token_store.keyring_service, "secret-service");
    assert_eq!(daemon.auth.rate_limit_per_minute, 7);

    let persisted = serde_json::to_string(&config.persistable()).unwrap();
    assert!(!persisted.contains("secret-service"));
    assert!(persisted.contains("rate_limit_per_minute"));
}

#[test]
fn secret_json_blob_leaves_are_tracked() {
    let config = LoadedConfig::from_sources(
        None,
        vars(&[("MAHI_SECRET_OVERRIDES", r#"{"model": {"openai": {"api_key": "sk-secret"}}}"#)]),
    )
    .unwrap();

    assert_eq!(config.root()["model"]["openai"]["api_key"], "sk-secret");
    let persisted = serde_json::to_string(&config.persistable()).unwrap();
    assert!(!persisted.contains("sk-secret"));
}

#[test]
fn malformed_override_blob_names_the_variable() {
    let err = LoadedConfig::from_sources(None, vars(&[("MAHI_CONFIG_OVERRIDES", "{nope")]))
        .unwrap_err();
    assert!(err.to_string().contains("MAHI_CONFIG_OVERRIDES"));
}

#[test]
fn bad_section_type_names_the_section() {
    let err = LoadedConfig::from_sources(
        None,
        vars(&[("MAHI_CFG__GATEWAY__HTTP_PORT", "\"not a port\"")]),
    )
    .unwrap()
    .daemon()
    .unwrap_err();
    assert!(err.to_string().contains("gateway"));
}
