//! Bootstrap script and application launch.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use guest_supervisor::Programs;
use tracing::{info, warn};

use crate::config::ProgramConfig;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("bootstrap {path} failed to start: {source}")]
    Bootstrap { path: PathBuf, source: io::Error },

    #[error("can not start {path}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
}

/// Run the bootstrap script, if present, and wait for it.
///
/// Returns `None` when there is no script. A non-zero exit is logged but
/// not an error.
pub fn run_bootstrap(script: &Path) -> Result<Option<ExitStatus>, LaunchError> {
    if !script.exists() {
        return Ok(None);
    }

    info!(script = %script.display(), "running bootstrap script");
    let status = Command::new(script)
        .status()
        .map_err(|e| LaunchError::Bootstrap {
            path: script.to_path_buf(),
            source: e,
        })?;
    if !status.success() {
        warn!(script = %script.display(), %status, "bootstrap script failed");
    }
    Ok(Some(status))
}

/// Roster slots, one per configured program, in launch order.
pub fn new_roster(programs: &[ProgramConfig]) -> Programs {
    Programs::new(programs.len())
}

/// Spawn every program and attach its pid to `roster`.
///
/// Stops at the first program that fails to start.
pub fn spawn_programs(programs: &[ProgramConfig], roster: &Programs) -> Result<(), LaunchError> {
    for (index, program) in programs.iter().enumerate() {
        let child = Command::new(&program.path)
            .args(&program.args)
            .envs(&program.env)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                path: program.path.clone(),
                source: e,
            })?;
        // The child is reaped by the PID 1 loop, not through this handle.
        let pid = child.id();
        roster.set_pid(index, pid);
        info!(pid, program = %program.path.display(), "started application");
    }
    Ok(())
}
