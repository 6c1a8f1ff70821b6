//! Supervisor configuration.
//!
//! Loaded from JSON; every field has a default so an absent or partial
//! file still yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_BOOTSTRAP_SCRIPT: &str = "/vorteil/busybox-install.sh";
pub const DEFAULT_SHELL: &str = "/vorteil/busybox";
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_SYSRQ_TRIGGER: &str = "/proc/sysrq-trigger";
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_FORCED_POWEROFF_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_COUNTDOWN_SECS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Busybox install script run before the applications.
    pub bootstrap_script: PathBuf,
    /// Embedded shell shipped with the daemon.
    pub shell: PathBuf,
    pub proc_root: PathBuf,
    pub sysrq_trigger: PathBuf,
    /// Receive buffer for one netlink datagram.
    pub recv_buffer_size: usize,
    /// Grace period used when shutting down from the fatal-error path.
    pub forced_poweroff_timeout_ms: u64,
    /// Seconds of "shutting down in N..." before flushing.
    pub countdown_secs: u32,
    pub debug: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            bootstrap_script: PathBuf::from(DEFAULT_BOOTSTRAP_SCRIPT),
            shell: PathBuf::from(DEFAULT_SHELL),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            sysrq_trigger: PathBuf::from(DEFAULT_SYSRQ_TRIGGER),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            forced_poweroff_timeout_ms: DEFAULT_FORCED_POWEROFF_TIMEOUT_MS,
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            debug: false,
        }
    }
}

impl SupervisorConfig {
    /// Executables owned by the daemon rather than the workload.
    pub fn internal_paths(&self) -> Vec<PathBuf> {
        vec![self.bootstrap_script.clone(), self.shell.clone()]
    }

    pub fn forced_poweroff_timeout(&self) -> Duration {
        Duration::from_millis(self.forced_poweroff_timeout_ms)
    }
}

/// Read and parse a JSON config file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}
