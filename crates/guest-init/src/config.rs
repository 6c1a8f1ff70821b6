//! guest-init configuration file.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use guest_supervisor::{ConfigError, SupervisorConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "GUEST_INIT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/vorteil/guest-init.json";
pub const DEFAULT_SIGNAL_GRACE_MS: u64 = 0;

/// One application launched at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    #[serde(flatten)]
    pub supervisor: SupervisorConfig,
    pub programs: Vec<ProgramConfig>,
    /// Grace period between signalling processes and flushing when the
    /// shutdown comes from SIGTERM/SIGINT.
    pub signal_grace_ms: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            programs: Vec::new(),
            signal_grace_ms: DEFAULT_SIGNAL_GRACE_MS,
        }
    }
}

impl InitConfig {
    pub fn signal_grace(&self) -> Duration {
        Duration::from_millis(self.signal_grace_ms)
    }

    /// Load `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match guest_supervisor::config::load(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }
}

/// Config path from the environment, or the default.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
