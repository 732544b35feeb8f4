// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Planner and query result types consumed by the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a plan produced by the backend facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAction {
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub preview_required: bool,
}

impl PlanAction {
    /// Plain informational step, the fallback when a planner reply cannot
    /// be parsed into structured actions.
    pub fn note(text: impl Into<String>) -> Self {
        Self {
            name: "note".to_string(),
            payload: serde_json::json!({ "text": text.into() }),
            sensitive: false,
            preview_required: false,
        }
    }
}

/// A scored document hit returned by `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub doc_id: String,
    pub score: f64,
    pub text: String,
}
