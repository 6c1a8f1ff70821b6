//! Process table backed by `/proc`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A row of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: u32,
}

/// Read access to the OS process table.
pub trait ProcessTable: Send + Sync {
    /// List every process currently known to the kernel.
    fn processes(&self) -> io::Result<Vec<ProcessInfo>>;

    /// Resolve the executable of `pid`. `None` once the process is gone
    /// (or for kernel threads, which have no executable).
    fn exe_path(&self, pid: u32) -> Option<PathBuf>;
}

/// [`ProcessTable`] reading a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProcessTable for ProcFs {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>> {
        let mut processes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // The process may exit between read_dir and this read.
            let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if let Some(parent_pid) = parse_parent_pid(&stat) {
                processes.push(ProcessInfo { pid, parent_pid });
            }
        }
        Ok(processes)
    }

    fn exe_path(&self, pid: u32) -> Option<PathBuf> {
        fs::read_link(self.root.join(pid.to_string()).join("exe"))
            .ok()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// Extract the parent pid from a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or `)`, so fields are counted from the last `)`.
fn parse_parent_pid(stat: &str) -> Option<u32> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(1)?.parse().ok()
}
