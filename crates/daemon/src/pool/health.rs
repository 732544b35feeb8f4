// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker process telemetry via sysinfo.

use serde_json::{json, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

pub(super) fn refresh(sys: &mut System, pids: &[u32]) {
    if pids.is_empty() {
        return;
    }
    let pids: Vec<Pid> = pids.iter().map(|pid| Pid::from_u32(*pid)).collect();
    sys.refresh_processes(ProcessesToUpdate::Some(&pids), true);
}

#[allow(clippy::too_many_arguments)]
pub(super) fn describe(
    sys: &System,
    name: &str,
    pid: u32,
    alive: bool,
    uptime: f64,
    restarts: u32,
    port: u16,
    now_ms: u64,
) -> Value {
    let mut info = json!({
        "name": name,
        "pid": pid,
        "alive": alive,
        "uptime": uptime.max(0.0),
        "restarts": restarts,
        "port": port,
        "last_heartbeat_at": now_ms,
        "cpu_percent": Value::Null,
        "memory_rss": Value::Null,
        "num_threads": Value::Null,
    });

    if alive {
        if let Some(process) = sys.process(Pid::from_u32(pid)) {
            info["cpu_percent"] = json!(process.cpu_usage());
            info["memory_rss"] = json!(process.memory());
            #[cfg(target_os = "linux")]
            if let Some(tasks) = process.tasks() {
                info["num_threads"] = json!(tasks.len());
            }
        }
    }

    info
}
