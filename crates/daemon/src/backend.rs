// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend facade consumed by the gateway.
//!
//! The model-backed planner and the vector store live outside this crate;
//! the daemon ships a deterministic in-memory implementation so the
//! runtime plane is fully operable (and testable) on its own.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use mahi_core::{Hit, PlanAction};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
}

/// Operations the gateway dispatches. Implementations may be expensive;
/// they are always invoked through the backend executor, never inline on
/// a transport task.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn query(&self, query: &str, k: usize) -> Result<Vec<Hit>, BackendError>;
    async fn index(&self, text: &str, source: &str) -> Result<String, BackendError>;
    async fn plan(
        &self,
        goal: &str,
        params: &Map<String, Value>,
    ) -> Result<Vec<PlanAction>, BackendError>;
    async fn document_count(&self) -> u64;
}

struct Doc {
    text: String,
    #[allow(dead_code)]
    source: String,
    tokens: BTreeSet<String>,
}

/// In-memory store with token-overlap scoring and a rule-based planner.
#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<IndexMap<String, Doc>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous count for metrics providers.
    pub fn count(&self) -> u64 {
        self.docs.lock().len() as u64
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn query(&self, query: &str, k: usize) -> Result<Vec<Hit>, BackendError> {
        let query_tokens = tokens(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.docs.lock();
        let mut scored: Vec<Hit> = docs
            .iter()
            .map(|(id, doc)| {
                let overlap = query_tokens.intersection(&doc.tokens).count();
                Hit {
                    doc_id: id.clone(),
                    score: overlap as f64 / query_tokens.len() as f64,
                    text: doc.text.clone(),
                }
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn index(&self, text: &str, source: &str) -> Result<String, BackendError> {
        let doc_id = Uuid::new_v4().to_string();
        self.docs.lock().insert(
            doc_id.clone(),
            Doc { text: text.to_string(), source: source.to_string(), tokens: tokens(text) },
        );
        Ok(doc_id)
    }

    async fn plan(
        &self,
        goal: &str,
        _params: &Map<String, Value>,
    ) -> Result<Vec<PlanAction>, BackendError> {
        let steps: Vec<&str> =
            goal.split(" then ").map(str::trim).filter(|s| !s.is_empty()).collect();
        if steps.is_empty() {
            return Ok(vec![PlanAction::note(goal)]);
        }
        Ok(steps
            .iter()
            .enumerate()
            .map(|(index, step)| PlanAction {
                name: "plan.step".to_string(),
                payload: serde_json::json!({ "index": index, "step": step }),
                sensitive: false,
                preview_required: false,
            })
            .collect())
    }

    async fn document_count(&self) -> u64 {
        self.count()
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
