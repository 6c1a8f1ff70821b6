//! Process supervision and shutdown core for the guest init.
//!
//! The guest runs a fixed set of applications launched once at boot. This
//! crate watches the kernel process connector for fork/exec/exit events,
//! keeps track of which application processes are alive, and powers the
//! VM off once the last one exits:
//!
//! 1. [`listener`] receives netlink datagrams and decodes them with `cn-proc`
//! 2. [`registry`] classifies processes and decides when the workload is done
//! 3. [`shutdown`] signals remaining processes, flushes disks and reboots
//!
//! [`phase`] is the init phase shared with the rest of the daemon; only
//! exits observed after every application has been launched count.

pub mod config;
pub mod disk;
pub mod error;
pub mod listener;
pub mod logging;
pub mod phase;
pub mod procfs;
pub mod registry;
pub mod roster;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use config::SupervisorConfig;
pub use error::{ConfigError, SupervisorError};
pub use listener::{ConnectorSocket, EventSource, Listener, ListenerExit};
pub use phase::{InitPhase, SharedPhase};
pub use procfs::{ProcFs, ProcessInfo, ProcessTable};
pub use registry::{Classification, ProcessRegistry, ShutdownDecision};
pub use roster::{ApplicationRoster, Programs};
pub use shutdown::{
    LinuxPlatform, Platform, RebootCommand, ShutdownOrchestrator, ShutdownState,
};
