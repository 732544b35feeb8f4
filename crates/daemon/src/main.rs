// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mahid: automation daemon binary.
//!
//! One binary, three modes: the daemon itself (default), the sandbox
//! worker child (`sandbox-worker`), and the pool's runtime worker stub
//! (`runtime-worker`). The child modes exist so sandboxed actions and
//! pool workers run in fresh address spaces of this same executable.

use std::process::ExitCode;

use mahi_daemon::lifecycle::{self, Daemon, Paths};
use mahi_daemon::{runtime_worker, sandbox};

fn main() -> ExitCode {
    let mode = std::env::args().nth(1);
    match mode.as_deref() {
        Some("sandbox-worker") => ExitCode::from(sandbox::worker::run() as u8),
        Some("runtime-worker") => runtime_worker::main(),
        _ => daemon_main(),
    }
}

fn daemon_main() -> ExitCode {
    let paths = match Paths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("mahid: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&paths.state_dir) {
        eprintln!("mahid: cannot create state dir {}: {e}", paths.state_dir.display());
        return ExitCode::FAILURE;
    }
    let _log_guard = lifecycle::init_tracing(&paths);

    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mahid: {e}");
            tracing::error!(error = %e, "daemon failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn serve() -> Result<(), mahi_daemon::LifecycleError> {
    let daemon = Daemon::startup().await?;
    daemon.print_banner();
    daemon.run().await
}
