// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named action handlers and the capability-gated context they run in.
//!
//! Unknown names fail before any child is spawned. File, network, and
//! subprocess operations go through [`SandboxCtx`] helpers so the
//! capability flags are enforced in one place regardless of handler.

use serde_json::{Map, Value};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub(crate) const FILE_DENIED: &str = "File system access is restricted inside sandbox";
pub(crate) const NETWORK_DENIED: &str = "Network access is disabled in sandbox";
pub(crate) const SUBPROCESS_DENIED: &str = "Subprocess creation is disabled in sandbox";

type Handler = fn(&mut SandboxCtx, &[Value], &Map<String, Value>) -> Result<Value, String>;

/// A registered sandbox action.
pub struct ActionSpec {
    pub name: &'static str,
    /// Permissions checked by the harness before spawning.
    pub required_permissions: &'static [&'static str],
    pub summary: &'static str,
    pub(crate) handler: Handler,
}

static REGISTRY: &[ActionSpec] = &[
    ActionSpec {
        name: "echo",
        required_permissions: &[],
        summary: "Return the provided arguments unchanged.",
        handler: echo,
    },
    ActionSpec {
        name: "math:add",
        required_permissions: &[],
        summary: "Add the numeric arguments.",
        handler: math_add,
    },
    ActionSpec {
        name: "time:sleep",
        required_permissions: &[],
        summary: "Sleep for the given number of seconds.",
        handler: time_sleep,
    },
    ActionSpec {
        name: "fs:write",
        required_permissions: &[],
        summary: "Write text to a file inside the sandbox working directory.",
        handler: fs_write,
    },
    ActionSpec {
        name: "fs:read",
        required_permissions: &[],
        summary: "Read a text file from the sandbox working directory.",
        handler: fs_read,
    },
    ActionSpec {
        name: "net:connect",
        required_permissions: &[],
        summary: "Open a TCP connection to a host and port.",
        handler: net_connect,
    },
    ActionSpec {
        name: "shell:run",
        required_permissions: &["shell_access"],
        summary: "Execute a shell command and capture stdout/stderr.",
        handler: shell_run,
    },
];

pub fn find(name: &str) -> Option<&'static ActionSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

pub fn registry() -> &'static [ActionSpec] {
    REGISTRY
}

/// Capability gates plus captured output for one sandboxed invocation.
pub struct SandboxCtx {
    root: PathBuf,
    allow_files: bool,
    allow_network: bool,
    allow_subprocesses: bool,
    pub stdout: String,
    pub stderr: String,
}

impl SandboxCtx {
    pub fn new(
        root: PathBuf,
        allow_files: bool,
        allow_network: bool,
        allow_subprocesses: bool,
    ) -> Self {
        Self {
            root,
            allow_files,
            allow_network,
            allow_subprocesses,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Validate a path against the sandbox root unless file access is
    /// granted. Normalization is purely lexical; the sandbox root is the
    /// child's working directory.
    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
            normalize(&cwd.join(path))
        };
        if self.allow_files || absolute.starts_with(normalize(&self.root)) {
            Ok(absolute)
        } else {
            Err(FILE_DENIED.to_string())
        }
    }

    pub fn write_file(&mut self, raw: &str, text: &str) -> Result<PathBuf, String> {
        let path = self.resolve(raw)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, text).map_err(|e| e.to_string())?;
        Ok(path)
    }

    pub fn read_file(&self, raw: &str) -> Result<String, String> {
        let path = self.resolve(raw)?;
        std::fs::read_to_string(&path).map_err(|e| e.to_string())
    }

    pub fn connect(&self, host: &str, port: u16) -> Result<(), String> {
        if !self.allow_network {
            return Err(NETWORK_DENIED.to_string());
        }
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| e.to_string())?
            .next()
            .ok_or_else(|| format!("no address for {host}:{port}"))?;
        TcpStream::connect_timeout(&addr, Duration::from_secs(5))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    pub fn run_command(
        &mut self,
        program: &str,
        args: &[&str],
    ) -> Result<std::process::Output, String> {
        if !self.allow_subprocesses {
            return Err(SUBPROCESS_DENIED.to_string());
        }
        std::process::Command::new(program)
            .args(args)
            .output()
            .map_err(|e| e.to_string())
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching
/// the filesystem, so gating cannot be bypassed with dot segments.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

fn string_arg(
    kwargs: &Map<String, Value>,
    key: &str,
    args: &[Value],
    index: usize,
) -> Option<String> {
    kwargs
        .get(key)
        .or_else(|| args.get(index))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn echo(_ctx: &mut SandboxCtx, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, String> {
    Ok(serde_json::json!({ "args": args, "kwargs": kwargs }))
}

fn math_add(
    _ctx: &mut SandboxCtx,
    args: &[Value],
    _kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let mut sum = 0.0;
    for arg in args {
        sum += arg.as_f64().ok_or_else(|| "math:add requires numeric arguments".to_string())?;
    }
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Ok(Value::from(sum as i64))
    } else {
        Ok(Value::from(sum))
    }
}

fn time_sleep(
    _ctx: &mut SandboxCtx,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let seconds = kwargs
        .get("seconds")
        .or_else(|| args.first())
        .and_then(Value::as_f64)
        .ok_or_else(|| "time:sleep requires seconds".to_string())?;
    std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    Ok(Value::from("done"))
}

fn fs_write(
    ctx: &mut SandboxCtx,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let path = string_arg(kwargs, "path", args, 0).ok_or("fs:write requires path")?;
    let text = string_arg(kwargs, "text", args, 1).ok_or("fs:write requires text")?;
    let written = ctx.write_file(&path, &text)?;
    // Read back so the caller sees exactly what landed on disk.
    let contents = std::fs::read_to_string(&written).map_err(|e| e.to_string())?;
    Ok(Value::from(contents))
}

fn fs_read(
    ctx: &mut SandboxCtx,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let path = string_arg(kwargs, "path", args, 0).ok_or("fs:read requires path")?;
    ctx.read_file(&path).map(Value::from)
}

fn net_connect(
    ctx: &mut SandboxCtx,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let host =
        string_arg(kwargs, "host", args, 0).unwrap_or_else(|| "example.com".to_string());
    let port = kwargs
        .get("port")
        .or_else(|| args.get(1))
        .and_then(Value::as_u64)
        .unwrap_or(80) as u16;
    ctx.connect(&host, port)?;
    Ok(serde_json::json!({ "connected": format!("{host}:{port}") }))
}

fn shell_run(
    ctx: &mut SandboxCtx,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<Value, String> {
    let command = string_arg(kwargs, "command", args, 0).ok_or("shell:run requires command")?;
    let output = ctx.run_command("sh", &["-c", &command])?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    ctx.stdout.push_str(&stdout);
    ctx.stderr.push_str(&stderr);
    Ok(serde_json::json!({
        "exit_code": output.status.code(),
        "stdout": stdout,
        "stderr": stderr,
    }))
}

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;
