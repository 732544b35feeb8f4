// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport (JSON over HTTP/1.1).
//!
//! Bodies are parsed by hand so error responses keep the `{"error": …}`
//! shape regardless of how the request was malformed. Backend calls go
//! through the executor with the configured deadline; expiry maps to 504.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use mahi_core::ErrorKind;

use crate::sandbox::{SandboxAction, SandboxError};

use super::executor::ExecError;
use super::proto::{k_field, params_field, string_field};
use super::{authorize, AuthOutcome, GatewayState};

pub(crate) fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/status", get(status))
        .route("/v1/query", post(query))
        .route("/v1/index", post(index))
        .route("/v1/plan", post(plan))
        .route("/v1/execute", post(execute))
        .with_state(state)
}

fn error_response(status: StatusCode, kind: ErrorKind) -> Response {
    (status, Json(json!({ "error": kind.as_str() }))).into_response()
}

/// Missing-field errors carry the field name rather than a kind.
fn field_required(field: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("{field} required") })))
        .into_response()
}

/// `Authorization: Bearer <token>` or `X-Mahi-Token: <token>`.
fn extract_token(headers: &HeaderMap) -> String {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            return token.trim().to_string();
        }
    }
    headers
        .get("x-mahi-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn require_scope(state: &GatewayState, headers: &HeaderMap, scope: &str) -> Result<(), Response> {
    match authorize(state, &extract_token(headers), Some(scope)) {
        AuthOutcome::Authorized(_) => Ok(()),
        AuthOutcome::Unauthorized => {
            Err(error_response(StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized))
        }
        AuthOutcome::RateLimited => {
            Err(error_response(StatusCode::TOO_MANY_REQUESTS, ErrorKind::RateLimitExceeded))
        }
        AuthOutcome::StoreError => {
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::TokenStoreError))
        }
    }
}

fn parse_body(body: &Bytes) -> Result<Value, Response> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) if value.is_object() => Ok(value),
        _ => Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_json" }))).into_response()),
    }
}

fn exec_error(e: ExecError) -> Response {
    match e {
        ExecError::TimedOut => error_response(StatusCode::GATEWAY_TIMEOUT, ErrorKind::TimedOut),
        ExecError::Unreachable(message) => {
            tracing::error!(error = %message, "backend call failed");
            error_response(StatusCode::BAD_GATEWAY, ErrorKind::BackendUnreachable)
        }
    }
}

async fn status(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_scope(&state, &headers, "status") {
        return denied;
    }
    let metrics = (state.metrics)();
    let gateway = state.registry.snapshot();
    Json(json!({ "metrics": metrics, "gateway": gateway })).into_response()
}

async fn query(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_scope(&state, &headers, "query") {
        return denied;
    }
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(invalid) => return invalid,
    };
    let query = string_field(&payload, "query");
    if query.is_empty() {
        return field_required("query");
    }
    match state.backend.query(query, k_field(&payload), Some(state.http_deadline)).await {
        Ok(hits) => Json(json!({ "hits": hits })).into_response(),
        Err(e) => exec_error(e),
    }
}

async fn index(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_scope(&state, &headers, "index") {
        return denied;
    }
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(invalid) => return invalid,
    };
    let text = string_field(&payload, "text");
    if text.is_empty() {
        return field_required("text");
    }
    let source = {
        let source = string_field(&payload, "source");
        if source.is_empty() {
            "http".to_string()
        } else {
            source
        }
    };
    match state.backend.index(text, source, Some(state.http_deadline)).await {
        Ok(doc_id) => Json(json!({ "doc_id": doc_id })).into_response(),
        Err(e) => exec_error(e),
    }
}

async fn plan(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_scope(&state, &headers, "plan") {
        return denied;
    }
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(invalid) => return invalid,
    };
    let goal = string_field(&payload, "goal");
    if goal.is_empty() {
        return field_required("goal");
    }
    match state.backend.plan(goal, params_field(&payload), Some(state.http_deadline)).await {
        Ok(actions) => Json(json!({ "actions": actions })).into_response(),
        Err(e) => exec_error(e),
    }
}

async fn execute(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_scope(&state, &headers, "execute") {
        return denied;
    }
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(invalid) => return invalid,
    };
    let target = string_field(&payload, "action");
    if target.is_empty() {
        return field_required("action");
    }
    let Some(harness) = state.sandbox.clone() else {
        return error_response(StatusCode::NOT_FOUND, ErrorKind::NotFound);
    };

    let action = SandboxAction {
        target,
        args: payload.get("args").and_then(Value::as_array).cloned().unwrap_or_default(),
        kwargs: payload.get("kwargs").and_then(Value::as_object).cloned().unwrap_or_default(),
        required_permissions: Default::default(),
    };

    // The harness blocks on the child; keep it off the async workers.
    let outcome = tokio::task::spawn_blocking(move || harness.execute(&action)).await;
    match outcome {
        Ok(Ok(result)) => Json(json!({ "result": result })).into_response(),
        Ok(Err(SandboxError::PermissionDenied { .. })) => {
            error_response(StatusCode::FORBIDDEN, ErrorKind::PermissionDenied)
        }
        Ok(Err(SandboxError::UnknownTarget(_))) => {
            error_response(StatusCode::NOT_FOUND, ErrorKind::NotFound)
        }
        Ok(Err(SandboxError::UnknownPermission(_))) => {
            error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest)
        }
        Ok(Err(SandboxError::Io(e))) => {
            tracing::error!(error = %e, "sandbox spawn failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::SandboxFailure)
        }
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::SandboxFailure),
    }
}
