//! Launched application handles, as seen by the shutdown decision.

use std::sync::Mutex;

/// Read-only view of the applications the daemon launches.
pub trait ApplicationRoster: Send + Sync {
    /// True once every application has an OS process attached.
    fn all_started(&self) -> bool;
}

/// Applications configured for this guest, one slot per program in launch
/// order. The launcher fills in each pid once the process is spawned.
#[derive(Debug, Default)]
pub struct Programs {
    pids: Mutex<Vec<Option<u32>>>,
}

impl Programs {
    pub fn new(count: usize) -> Self {
        Self {
            pids: Mutex::new(vec![None; count]),
        }
    }

    /// Attach the spawned process to the application at `index`.
    /// Returns `false` if there is no such application.
    pub fn set_pid(&self, index: usize, pid: u32) -> bool {
        // Recover from poisoned mutex: every writer only assigns a single slot.
        let mut pids = self.pids.lock().unwrap_or_else(|e| e.into_inner());
        match pids.get_mut(index) {
            Some(slot) => {
                *slot = Some(pid);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ApplicationRoster for Programs {
    fn all_started(&self) -> bool {
        self.pids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .all(Option::is_some)
    }
}
