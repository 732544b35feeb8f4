// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend executor: the channel-per-request bridge between transports
//! and the backend facade.
//!
//! Transports enqueue a job carrying a one-shot reply channel; a single
//! task owns the facade, consumes jobs in order, and fulfils replies.
//! Only the HTTP transport applies a deadline while waiting; WS and IPC
//! requests run until the client gives up on the connection.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use mahi_core::{Hit, PlanAction};

use crate::backend::{Backend, BackendError};

const JOB_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("timed_out")]
    TimedOut,

    #[error("backend_unreachable: {0}")]
    Unreachable(String),
}

pub(crate) enum BackendJob {
    Query {
        query: String,
        k: usize,
        reply: oneshot::Sender<Result<Vec<Hit>, BackendError>>,
    },
    Index {
        text: String,
        source: String,
        reply: oneshot::Sender<Result<String, BackendError>>,
    },
    Plan {
        goal: String,
        params: Map<String, Value>,
        reply: oneshot::Sender<Result<Vec<PlanAction>, BackendError>>,
    },
    DocumentCount {
        reply: oneshot::Sender<u64>,
    },
}

/// Cheap handle transports use to submit backend work.
#[derive(Clone)]
pub struct BackendHandle {
    tx: mpsc::Sender<BackendJob>,
}

impl BackendHandle {
    /// Spawn the executor task owning `backend`.
    pub fn spawn(backend: Arc<dyn Backend>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BackendJob>(JOB_QUEUE_DEPTH);
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    BackendJob::Query { query, k, reply } => {
                        let _ = reply.send(backend.query(&query, k).await);
                    }
                    BackendJob::Index { text, source, reply } => {
                        let _ = reply.send(backend.index(&text, &source).await);
                    }
                    BackendJob::Plan { goal, params, reply } => {
                        let _ = reply.send(backend.plan(&goal, &params).await);
                    }
                    BackendJob::DocumentCount { reply } => {
                        let _ = reply.send(backend.document_count().await);
                    }
                }
            }
        });
        (Self { tx }, task)
    }

    pub async fn query(
        &self,
        query: String,
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<Hit>, ExecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(BackendJob::Query { query, k, reply }).await?;
        await_reply(rx, deadline).await
    }

    pub async fn index(
        &self,
        text: String,
        source: String,
        deadline: Option<Duration>,
    ) -> Result<String, ExecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(BackendJob::Index { text, source, reply }).await?;
        await_reply(rx, deadline).await
    }

    pub async fn plan(
        &self,
        goal: String,
        params: Map<String, Value>,
        deadline: Option<Duration>,
    ) -> Result<Vec<PlanAction>, ExecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(BackendJob::Plan { goal, params, reply }).await?;
        await_reply(rx, deadline).await
    }

    pub async fn document_count(&self) -> Result<u64, ExecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(BackendJob::DocumentCount { reply }).await?;
        rx.await.map_err(|_| ExecError::Unreachable("executor stopped".to_string()))
    }

    async fn submit(&self, job: BackendJob) -> Result<(), ExecError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| ExecError::Unreachable("executor stopped".to_string()))
    }
}

async fn await_reply<T>(
    rx: oneshot::Receiver<Result<T, BackendError>>,
    deadline: Option<Duration>,
) -> Result<T, ExecError> {
    let outcome = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(ExecError::TimedOut),
        },
        None => rx.await,
    };
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(BackendError::Unreachable(message))) => Err(ExecError::Unreachable(message)),
        Err(_) => Err(ExecError::Unreachable("executor stopped".to_string())),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
