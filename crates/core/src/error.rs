// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds shared across transports.
//!
//! Transports never translate a failure into success; each maps one of
//! these kinds onto its own wire shape (HTTP status, WS close code,
//! single-line IPC object).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable failure classification carried on every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, invalid, or expired token, or missing scope.
    Unauthorized,
    /// Per-token sliding window exceeded.
    RateLimitExceeded,
    /// Malformed JSON or missing required field.
    InvalidRequest,
    /// Unknown endpoint, worker, or action handler.
    NotFound,
    /// Worker pool at `max`.
    CapacityExceeded,
    /// Duplicate worker name.
    NameConflict,
    /// Sandbox action lacks a required permission.
    PermissionDenied,
    /// Sandbox wall-clock expiry or HTTP backend deadline.
    TimedOut,
    /// Sandbox child died without a result or the target failed.
    SandboxFailure,
    /// Backend facade call failed.
    BackendUnreachable,
    /// Token persistence layer failed.
    TokenStoreError,
    /// Supervisor stopped retrying.
    RestartBudgetExhausted,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::NameConflict => "name_conflict",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::SandboxFailure => "sandbox_failure",
            ErrorKind::BackendUnreachable => "backend_unreachable",
            ErrorKind::TokenStoreError => "token_store_error",
            ErrorKind::RestartBudgetExhausted => "restart_budget_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the endpoint registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unsupported protocol '{0}'")]
    InvalidProtocol(String),
}
