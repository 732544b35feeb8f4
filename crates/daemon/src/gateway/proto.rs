// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request parsing and response shapes shared by the WS and IPC
//! transports.
//!
//! Requests are dispatched on their `action` field rather than through a
//! tagged enum so malformed input maps onto the exact error strings the
//! protocol promises: `invalid_json`, `<field> required`,
//! `unsupported_action`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mahi_core::{Hit, PlanAction};

pub(crate) const DEFAULT_QUERY_K: usize = 5;

/// A validated client request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedRequest {
    Ping,
    Status,
    Query { query: String, k: usize },
    Plan { goal: String, params: Map<String, Value> },
}

/// Why a request line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestError {
    InvalidJson,
    MissingField(&'static str),
    UnsupportedAction,
}

impl RequestError {
    pub(crate) fn message(&self) -> String {
        match self {
            RequestError::InvalidJson => "invalid_json".to_string(),
            RequestError::MissingField(field) => format!("{field} required"),
            RequestError::UnsupportedAction => "unsupported_action".to_string(),
        }
    }
}

/// Parse one request object.
pub(crate) fn parse_request(raw: &str) -> Result<ParsedRequest, RequestError> {
    let payload: Value = serde_json::from_str(raw).map_err(|_| RequestError::InvalidJson)?;
    parse_request_value(&payload)
}

pub(crate) fn parse_request_value(payload: &Value) -> Result<ParsedRequest, RequestError> {
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match action.as_str() {
        "ping" => Ok(ParsedRequest::Ping),
        "status" => Ok(ParsedRequest::Status),
        "query" => {
            let query = string_field(payload, "query");
            if query.is_empty() {
                return Err(RequestError::MissingField("query"));
            }
            Ok(ParsedRequest::Query { query, k: k_field(payload) })
        }
        "plan" => {
            let goal = string_field(payload, "goal");
            if goal.is_empty() {
                return Err(RequestError::MissingField("goal"));
            }
            Ok(ParsedRequest::Plan { goal, params: params_field(payload) })
        }
        _ => Err(RequestError::UnsupportedAction),
    }
}

pub(crate) fn string_field(payload: &Value, field: &str) -> String {
    payload.get(field).and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

pub(crate) fn k_field(payload: &Value) -> usize {
    payload
        .get("k")
        .and_then(Value::as_u64)
        .filter(|k| *k > 0)
        .map(|k| k as usize)
        .unwrap_or(DEFAULT_QUERY_K)
}

pub(crate) fn params_field(payload: &Value) -> Map<String, Value> {
    payload.get("params").and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Server-to-client message on the WebSocket transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamResponse {
    Ready,
    Pong { ts: f64 },
    Status { metrics: Value },
    QueryResult { hits: Vec<Hit> },
    PlanResult { actions: Vec<PlanAction> },
    Error { error: String },
}

impl StreamResponse {
    pub(crate) fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"serialization_failed"}"#.to_string()
        })
    }
}

#[cfg(test)]
#[path = "proto_tests.rs"]
mod tests;
