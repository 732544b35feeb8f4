// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// JSON blob deep-merged over the config file.
pub const CONFIG_OVERRIDES_ENV: &str = "MAHI_CONFIG_OVERRIDES";

/// JSON blob merged like [`CONFIG_OVERRIDES_ENV`] but with every leaf
/// marked non-persistable.
pub const SECRET_OVERRIDES_ENV: &str = "MAHI_SECRET_OVERRIDES";

/// Prefix for dotted-path overrides, e.g. `MAHI_CFG__MODEL__BACKEND`.
pub const CFG_PREFIX: &str = "MAHI_CFG__";

/// Secret variant of [`CFG_PREFIX`].
pub const SECRET_PREFIX: &str = "MAHI_SECRET__";

/// Resolve the state directory: `MAHI_STATE_DIR` > `~/.mahi`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("MAHI_STATE_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".mahi"))
}

/// Config file path override from `MAHI_CONFIG`.
pub fn config_path() -> Option<PathBuf> {
    std::env::var("MAHI_CONFIG").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Timeout for single IPC reads/writes.
pub fn ipc_timeout() -> Duration {
    std::env::var("MAHI_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
