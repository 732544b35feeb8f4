// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status metrics assembly.
//!
//! The gateway takes a plain closure so tests can substitute canned
//! metrics; the daemon builds the real provider here, folding in the
//! worker pool and sandbox snapshots when those subsystems are live.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;

use mahi_core::collect_system_metrics;

use crate::pool::WorkerPool;
use crate::sandbox::SandboxHarness;

pub type MetricsProvider = Arc<dyn Fn() -> Value + Send + Sync>;

/// Build the daemon's metrics provider.
pub fn provider(
    started: Instant,
    documents: Arc<dyn Fn() -> u64 + Send + Sync>,
    pool: Option<Arc<WorkerPool>>,
    sandbox: Option<Arc<SandboxHarness>>,
) -> MetricsProvider {
    let sys = Arc::new(Mutex::new(System::new()));
    Arc::new(move || {
        let mut metrics = {
            let mut sys = sys.lock();
            collect_system_metrics(&mut sys, started.elapsed().as_secs_f64(), documents())
        };
        if let Some(pool) = &pool {
            metrics.runtime_pool = Some(pool.snapshot());
        }
        if let Some(sandbox) = &sandbox {
            metrics.sandbox = Some(sandbox.status_snapshot());
        }
        serde_json::to_value(&metrics).unwrap_or_else(|_| Value::Object(Default::default()))
    })
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
