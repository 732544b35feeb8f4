// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host telemetry shared by status responses and the supervisor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::{Disks, System};

/// Host and runtime telemetry for dashboards and status APIs.
///
/// `runtime_pool` and `sandbox` are folded in by the daemon when those
/// subsystems are live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub hostname: String,
    pub platform: String,
    pub uptime_seconds: f64,
    pub documents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_available: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_free: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_pool: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Value>,
}

/// Collect host telemetry.
///
/// CPU usage is measured since the previous call on the same `System`;
/// callers that want meaningful percentages should reuse one instance
/// across samples.
pub fn collect_system_metrics(sys: &mut System, uptime_seconds: f64, documents: u64) -> SystemMetrics {
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total = sys.total_memory();
    let available = sys.available_memory();
    let memory_percent = if total > 0 {
        Some((total.saturating_sub(available)) as f32 / total as f32 * 100.0)
    } else {
        None
    };

    let mut metrics = SystemMetrics {
        hostname: System::host_name().unwrap_or_default(),
        platform: System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| "unknown".to_string()),
        uptime_seconds,
        documents,
        cpu_percent: Some(sys.global_cpu_usage()),
        memory_percent,
        memory_total: Some(total),
        memory_available: Some(available),
        ..SystemMetrics::default()
    };

    if let Some((total, free)) = home_disk_usage() {
        metrics.disk_total = Some(total);
        metrics.disk_free = Some(free);
        if total > 0 {
            metrics.disk_percent = Some((total.saturating_sub(free)) as f32 / total as f32 * 100.0);
        }
    }

    metrics
}

/// Usage of the disk holding the user's home directory.
///
/// Picks the mounted filesystem with the longest mount point that prefixes
/// the home path, falling back to the first listed disk.
fn home_disk_usage() -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    let home = std::env::var_os("HOME").map(std::path::PathBuf::from);

    let best = match home {
        Some(home) => disks
            .list()
            .iter()
            .filter(|disk| home.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len()),
        None => None,
    };

    best.or_else(|| disks.list().iter().max_by_key(|d| d.total_space()))
        .map(|disk| (disk.total_space(), disk.available_space()))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
