// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mahi-supervisor` - run the automation daemon under supervision.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;

use mahi_supervisor::{Supervisor, SupervisorConfig};

#[derive(Parser)]
#[command(about = "Run the automation daemon under supervision.")]
struct Args {
    /// File to append supervisor and child logs to
    #[arg(long = "log-file")]
    log_file: PathBuf,

    /// File used to persist supervisor state metadata
    #[arg(long = "state-file")]
    state_file: PathBuf,

    /// File holding the supervisor PID for the CLI
    #[arg(long = "pid-file")]
    pid_file: Option<PathBuf>,

    /// Config file with a [supervisor] section (defaults to $MAHI_CONFIG)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Maximum restarts permitted within the window
    #[arg(long = "max-restarts")]
    max_restarts: Option<u32>,

    /// Sliding window for the restart budget, in seconds
    #[arg(long = "window-seconds")]
    window_seconds: Option<f64>,

    /// Initial backoff delay before a restart, in seconds
    #[arg(long = "backoff-seconds")]
    backoff_seconds: Option<f64>,

    /// Maximum backoff delay between restarts, in seconds
    #[arg(long = "max-backoff-seconds")]
    max_backoff_seconds: Option<f64>,

    /// Grace period before force-killing the child, in seconds
    #[arg(long = "graceful-shutdown-seconds")]
    graceful_shutdown_seconds: Option<f64>,

    /// Disable the HTTP health endpoint
    #[arg(long = "no-health")]
    no_health: bool,

    /// Host for the health endpoint
    #[arg(long = "health-host")]
    health_host: Option<String>,

    /// Port for the health endpoint (0 picks an ephemeral port)
    #[arg(long = "health-port")]
    health_port: Option<u16>,

    /// Command to supervise (precede with --)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mahi-supervisor: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let command: Vec<String> =
        args.command.into_iter().filter(|part| part != "--").collect();
    if command.is_empty() {
        return Err(anyhow!("No command provided for supervision."));
    }

    let config_path = args
        .config
        .or_else(|| std::env::var("MAHI_CONFIG").ok().filter(|s| !s.is_empty()).map(PathBuf::from));
    let mut config = SupervisorConfig::from_config_file(config_path.as_deref());

    // CLI overrides take precedence over the config file.
    if let Some(value) = args.max_restarts {
        config.max_restarts = value;
    }
    if let Some(value) = args.window_seconds {
        config.window_seconds = value;
    }
    if let Some(value) = args.backoff_seconds {
        config.backoff_seconds = value;
    }
    if let Some(value) = args.max_backoff_seconds {
        config.max_backoff_seconds = value;
    }
    if let Some(value) = args.graceful_shutdown_seconds {
        config.graceful_shutdown_seconds = value;
    }
    if args.no_health {
        config.health_enabled = false;
    }
    if let Some(value) = args.health_host {
        config.health_host = value;
    }
    if let Some(value) = args.health_port {
        config.health_port = value;
    }

    let mut supervisor = Supervisor::new(command, args.log_file, args.state_file, config)?;
    if let Some(pid_file) = args.pid_file {
        supervisor = supervisor.with_pid_file(pid_file);
    }

    // SIGINT/SIGTERM stop the child gracefully, then the supervisor.
    let handle = supervisor.stop_handle();
    std::thread::Builder::new().name("signal-handler".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        runtime.block_on(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut sigint) = signal(SignalKind::interrupt()) else { return };
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else { return };
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            handle.stop();
        });
    })?;

    let code = supervisor.run();
    Ok(ExitCode::from(code.clamp(0, 255) as u8))
}
