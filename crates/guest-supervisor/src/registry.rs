//! Registry of workload processes.
//!
//! Owned by the event listener and only ever mutated from its thread, so the
//! sets need no locking.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::phase::InitPhase;
use crate::procfs::ProcessTable;
use crate::roster::ApplicationRoster;

/// Kind of a process, carrying the executable it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Application(PathBuf),
    Internal(PathBuf),
    /// The executable could not be resolved; the process is already gone.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDecision {
    NoAction,
    TriggerShutdown,
}

pub struct ProcessRegistry {
    /// Application thread-group ids believed alive.
    tracked: HashSet<u32>,
    /// Daemon-owned helper processes and their executables.
    internal: HashMap<u32, PathBuf>,
    internal_paths: Vec<PathBuf>,
    table: Arc<dyn ProcessTable>,
    roster: Arc<dyn ApplicationRoster>,
    triggered: bool,
}

impl ProcessRegistry {
    /// `internal_paths` lists the executables that belong to the daemon
    /// itself (bootstrap script, embedded shell, the init binary).
    pub fn new(
        internal_paths: Vec<PathBuf>,
        table: Arc<dyn ProcessTable>,
        roster: Arc<dyn ApplicationRoster>,
    ) -> Self {
        Self {
            tracked: HashSet::new(),
            internal: HashMap::new(),
            internal_paths,
            table,
            roster,
            triggered: false,
        }
    }

    /// Classify a running process by its executable.
    pub fn classify(&self, pid: u32) -> Classification {
        match self.table.exe_path(pid) {
            Some(exe) => self.classify_path(&exe),
            None => Classification::Unknown,
        }
    }

    pub fn classify_path(&self, exe: &Path) -> Classification {
        if self.internal_paths.iter().any(|p| p == exe) {
            Classification::Internal(exe.to_path_buf())
        } else {
            Classification::Application(exe.to_path_buf())
        }
    }

    /// Record a fork or exec of thread group `tgid`.
    ///
    /// A helper that execs an application is promoted to `tracked`; a
    /// tracked application stays tracked whatever it execs next.
    pub fn on_fork_or_exec(&mut self, pid: u32, tgid: u32) {
        match self.classify(tgid) {
            Classification::Application(exe) => {
                self.internal.remove(&tgid);
                if self.tracked.insert(tgid) {
                    debug!(
                        pid = tgid,
                        exe = %exe.display(),
                        tracked = self.tracked.len(),
                        "add application"
                    );
                }
            }
            Classification::Internal(exe) => {
                if !self.tracked.contains(&tgid) {
                    debug!(pid = tgid, exe = %exe.display(), "add internal process");
                    self.internal.insert(tgid, exe);
                }
            }
            Classification::Unknown => {
                // Process probably already finished.
                debug!(pid, tgid, "executable not resolvable, ignoring");
            }
        }
    }

    /// Record an exit and decide whether the workload has finished.
    ///
    /// Only thread-group leader exits count, and only the exit that empties
    /// `tracked` can trigger: an exit of a process that was never tracked
    /// is ignored. Exits seen before every application is launched never
    /// trigger a shutdown, and at most one `TriggerShutdown` is ever
    /// returned.
    pub fn on_exit(&mut self, pid: u32, tgid: u32, phase: InitPhase) -> ShutdownDecision {
        if pid != tgid {
            return ShutdownDecision::NoAction;
        }

        if let Some(exe) = self.internal.remove(&tgid) {
            debug!(pid = tgid, exe = %exe.display(), "internal process exited");
            return ShutdownDecision::NoAction;
        }

        if self.triggered {
            return ShutdownDecision::NoAction;
        }

        if self.tracked.is_empty() && phase < InitPhase::Launched {
            debug!(pid = tgid, %phase, "exit before applications registered");
            return ShutdownDecision::NoAction;
        }

        if !self.tracked.remove(&tgid) {
            debug!(pid = tgid, "exit of untracked process");
            return ShutdownDecision::NoAction;
        }
        debug!(pid = tgid, remaining = self.tracked.len(), "remove application");
        if !self.tracked.is_empty() {
            return ShutdownDecision::NoAction;
        }

        if phase < InitPhase::Launched {
            debug!(%phase, "still launching");
            return ShutdownDecision::NoAction;
        }

        // Applications may still be in bootstrap without a process.
        if !self.roster.all_started() {
            debug!("applications still starting");
            return ShutdownDecision::NoAction;
        }

        info!("no programs still running");
        self.triggered = true;
        ShutdownDecision::TriggerShutdown
    }

    /// Tracked application ids in ascending order.
    pub fn tracked(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.tracked.iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn internal_path(&self, tgid: u32) -> Option<&Path> {
        self.internal.get(&tgid).map(PathBuf::as_path)
    }

    pub fn internal_len(&self) -> usize {
        self.internal.len()
    }
}
