//! Orderly power-off of the guest.
//!
//! [`ShutdownOrchestrator::run`] can be reached from the event listener (the
//! workload finished), the fatal-error path and the PID 1 signal handler.
//! The first caller wins a compare-and-swap on the state and performs the
//! whole sequence; every other caller returns immediately.
//!
//! Sequence:
//! 1. SIGINT + SIGTERM to every user process
//! 2. Grace period, then a short countdown
//! 3. Emergency sync + remount read-only via sysrq
//! 4. Flush the boot disk
//! 5. `reboot(2)`
//!
//! Steps 1-4 are best-effort: failures are logged and the sequence moves on,
//! so the reboot call is always reached.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use nix::sys::reboot::RebootMode;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::disk::{self, DiskError};
use crate::phase::{InitPhase, SharedPhase};
use crate::procfs::{ProcFs, ProcessInfo, ProcessTable};

/// Final action passed to `reboot(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootCommand {
    PowerOff,
    Restart,
}

impl RebootCommand {
    fn mode(self) -> RebootMode {
        match self {
            Self::PowerOff => RebootMode::RB_POWER_OFF,
            Self::Restart => RebootMode::RB_AUTOBOOT,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running = 0,
    Stopping = 1,
    Flushing = 2,
    Terminated = 3,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        debug_assert!(v <= 3, "invalid ShutdownState: {v}");
        match v {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Flushing,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Flushing => f.write_str("flushing"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Side effects of the shutdown sequence.
pub trait Platform: Send + Sync {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>>;
    fn signal(&self, pid: u32, signal: Signal) -> nix::Result<()>;
    fn sleep(&self, duration: Duration);
    /// Write a single key to the sysrq trigger.
    fn sysrq(&self, key: u8) -> io::Result<()>;
    /// Resolve and flush the boot disk, returning its device path.
    fn flush_boot_disk(&self) -> Result<PathBuf, DiskError>;
    /// Only returns on failure when running on a real kernel.
    fn reboot(&self, command: RebootCommand) -> nix::Result<()>;
}

impl<P: Platform + ?Sized> Platform for Arc<P> {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>> {
        (**self).processes()
    }

    fn signal(&self, pid: u32, signal: Signal) -> nix::Result<()> {
        (**self).signal(pid, signal)
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn sysrq(&self, key: u8) -> io::Result<()> {
        (**self).sysrq(key)
    }

    fn flush_boot_disk(&self) -> Result<PathBuf, DiskError> {
        (**self).flush_boot_disk()
    }

    fn reboot(&self, command: RebootCommand) -> nix::Result<()> {
        (**self).reboot(command)
    }
}

/// [`Platform`] for the running guest kernel.
pub struct LinuxPlatform {
    procfs: ProcFs,
    sysrq_trigger: PathBuf,
}

impl LinuxPlatform {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            procfs: ProcFs::new(&config.proc_root),
            sysrq_trigger: config.sysrq_trigger.clone(),
        }
    }
}

impl Platform for LinuxPlatform {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>> {
        self.procfs.processes()
    }

    fn signal(&self, pid: u32, signal: Signal) -> nix::Result<()> {
        let pid = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
        nix::sys::signal::kill(Pid::from_raw(pid), signal)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn sysrq(&self, key: u8) -> io::Result<()> {
        std::fs::write(&self.sysrq_trigger, [key])
    }

    fn flush_boot_disk(&self) -> Result<PathBuf, DiskError> {
        let device = disk::boot_disk(self.procfs.root())?;
        disk::flush_disk(&device)?;
        Ok(device)
    }

    fn reboot(&self, command: RebootCommand) -> nix::Result<()> {
        match nix::sys::reboot::reboot(command.mode()) {
            Ok(never) => match never {},
            Err(e) => Err(e),
        }
    }
}

pub struct ShutdownOrchestrator {
    state: AtomicU8,
    phase: Arc<SharedPhase>,
    platform: Box<dyn Platform>,
    countdown_secs: u32,
    forced_poweroff_timeout: Duration,
}

impl ShutdownOrchestrator {
    pub fn new(
        platform: Box<dyn Platform>,
        phase: Arc<SharedPhase>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            phase,
            platform,
            countdown_secs: config.countdown_secs,
            forced_poweroff_timeout: config.forced_poweroff_timeout(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Atomically transition between states using CAS. Returns `true` if the
    /// transition succeeded, `false` if the current state did not match `from`.
    fn transition(&self, from: ShutdownState, to: ShutdownState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Shut the guest down. Returns `false` without side effects if another
    /// caller already started the sequence.
    ///
    /// On a real kernel a successful run never returns.
    pub fn run(&self, command: RebootCommand, grace: Duration) -> bool {
        if !self.transition(ShutdownState::Running, ShutdownState::Stopping) {
            debug!(state = %self.state(), "shutdown already in progress");
            return false;
        }
        self.phase.advance(InitPhase::PoweringOff);

        info!("shutting down applications");
        self.kill_all();

        self.platform.sleep(grace);

        for remaining in (1..=self.countdown_secs).rev() {
            info!("shutting down in {remaining}...");
            self.platform.sleep(Duration::from_secs(1));
        }

        self.transition(ShutdownState::Stopping, ShutdownState::Flushing);

        // Emergency sync, then remount everything read-only.
        for key in [b's', b'u'] {
            if let Err(e) = self.platform.sysrq(key) {
                warn!(key = %char::from(key), "sysrq trigger failed: {e}");
            }
        }

        match self.platform.flush_boot_disk() {
            Ok(device) => debug!(device = %device.display(), "boot disk flushed"),
            Err(e) => error!("could not flush boot disk: {e}"),
        }

        self.transition(ShutdownState::Flushing, ShutdownState::Terminated);

        if let Err(e) = self.platform.reboot(command) {
            error!(?command, "reboot failed: {e}");
        }
        true
    }

    /// Fatal-error path: log `reason` and power off with the forced timeout.
    pub fn system_panic(&self, reason: &str) -> bool {
        error!("{reason}");
        self.run(RebootCommand::PowerOff, self.forced_poweroff_timeout)
    }

    /// Send SIGINT then SIGTERM to every process except init, kthreadd and
    /// their direct children.
    fn kill_all(&self) {
        let processes = match self.platform.processes() {
            Ok(processes) => processes,
            Err(e) => {
                error!("can not get processes: {e}");
                return;
            }
        };

        for process in processes
            .iter()
            .filter(|p| p.pid > 2 && p.parent_pid > 2)
        {
            for signal in [Signal::SIGINT, Signal::SIGTERM] {
                // The process may already be gone.
                if let Err(e) = self.platform.signal(process.pid, signal) {
                    debug!(pid = process.pid, %signal, "signal failed: {e}");
                }
            }
        }
    }
}
