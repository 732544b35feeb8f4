// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entry point of the `mahid sandbox-worker` child process.
//!
//! Reads one payload line from stdin, applies limits, dispatches the
//! handler, and emits exactly one result line on stdout. Exit codes are
//! only meaningful for protocol failures; handler failures are reported
//! in the result message.

use std::io::Read;
use std::time::Instant;

use serde_json::Value;

use super::actions::{self, SandboxCtx};
use super::{limits, ChildMessage, ChildPayload};

pub fn run() -> i32 {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        return 2;
    }
    let Some(line) = raw.lines().next() else {
        return 2;
    };
    let payload: ChildPayload = match serde_json::from_str(line) {
        Ok(payload) => payload,
        Err(_) => return 2,
    };

    let started = Instant::now();
    let limits_snapshot = limits::apply(&payload.limits);
    let usage = |enabled: bool| {
        if enabled {
            limits::usage_snapshot()
        } else {
            Value::Null
        }
    };

    let mut ctx = SandboxCtx::new(
        payload.limits.working_dir.clone(),
        payload.limits.allow_files,
        payload.limits.allow_network,
        payload.limits.allow_subprocesses,
    );

    let message = match actions::find(&payload.target) {
        None => ChildMessage::Error {
            error: format!("Unknown sandbox action '{}'", payload.target),
            stdout: String::new(),
            stderr: String::new(),
            limits: limits_snapshot,
            usage: usage(payload.limits.collect_usage),
        },
        Some(spec) => match (spec.handler)(&mut ctx, &payload.args, &payload.kwargs) {
            Ok(result) => ChildMessage::Ok {
                result,
                stdout: ctx.stdout,
                stderr: ctx.stderr,
                duration: started.elapsed().as_secs_f64(),
                limits: limits_snapshot,
                usage: usage(payload.limits.collect_usage),
            },
            Err(error) => ChildMessage::Error {
                error,
                stdout: ctx.stdout,
                stderr: ctx.stderr,
                limits: limits_snapshot,
                usage: usage(payload.limits.collect_usage),
            },
        },
    };

    match serde_json::to_string(&message) {
        Ok(line) => {
            println!("{line}");
            0
        }
        Err(_) => 2,
    }
}
