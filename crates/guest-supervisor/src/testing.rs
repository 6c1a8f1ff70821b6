//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::disk::DiskError;
use crate::listener::EventSource;
use crate::procfs::{ProcessInfo, ProcessTable};
use crate::roster::ApplicationRoster;
use crate::shutdown::{Platform, RebootCommand};

#[derive(Default)]
pub struct FakeTable {
    exes: Mutex<HashMap<u32, PathBuf>>,
}

impl FakeTable {
    pub fn set_exe(&self, pid: u32, exe: &str) {
        self.exes.lock().unwrap().insert(pid, PathBuf::from(exe));
    }
}

impl ProcessTable for FakeTable {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>> {
        Ok(Vec::new())
    }

    fn exe_path(&self, pid: u32) -> Option<PathBuf> {
        self.exes.lock().unwrap().get(&pid).cloned()
    }
}

pub struct FakeRoster(AtomicBool);

impl FakeRoster {
    pub fn started() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn pending() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set_started(&self, started: bool) {
        self.0.store(started, Ordering::SeqCst);
    }
}

impl ApplicationRoster for FakeRoster {
    fn all_started(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Side effect observed by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Signal(u32, Signal),
    Sleep(Duration),
    Sysrq(u8),
    FlushDisk,
    Reboot(RebootCommand),
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub processes: Vec<ProcessInfo>,
    pub fail_everything: bool,
    /// Real sleeps, to widen race windows in concurrency tests.
    pub sleep_for_real: bool,
    pub calls: Mutex<Vec<Call>>,
}

impl RecordingPlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reboots(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Reboot(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Platform for RecordingPlatform {
    fn processes(&self) -> io::Result<Vec<ProcessInfo>> {
        if self.fail_everything {
            return Err(io::Error::other("no procfs"));
        }
        Ok(self.processes.clone())
    }

    fn signal(&self, pid: u32, signal: Signal) -> nix::Result<()> {
        self.record(Call::Signal(pid, signal));
        if self.fail_everything {
            return Err(nix::errno::Errno::ESRCH);
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        self.record(Call::Sleep(duration));
        if self.sleep_for_real {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn sysrq(&self, key: u8) -> io::Result<()> {
        self.record(Call::Sysrq(key));
        if self.fail_everything {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(())
    }

    fn flush_boot_disk(&self) -> Result<PathBuf, DiskError> {
        self.record(Call::FlushDisk);
        if self.fail_everything {
            return Err(DiskError::NotFound);
        }
        Ok(PathBuf::from("/dev/vda"))
    }

    fn reboot(&self, command: RebootCommand) -> nix::Result<()> {
        self.record(Call::Reboot(command));
        if self.fail_everything {
            return Err(nix::errno::Errno::EPERM);
        }
        Ok(())
    }
}

/// Replays canned datagrams, then reports the source closed.
#[derive(Default)]
pub struct CannedSource {
    datagrams: VecDeque<io::Result<Vec<u8>>>,
}

impl CannedSource {
    pub fn new(datagrams: impl IntoIterator<Item = io::Result<Vec<u8>>>) -> Self {
        Self {
            datagrams: datagrams.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.datagrams.len()
    }
}

impl EventSource for CannedSource {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.datagrams.pop_front() {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some(n))
            }
        }
    }
}

/// Build a proc-connector netlink message carrying one event.
pub fn event_message(what: u32, data: &[u32]) -> Vec<u8> {
    let body = cn_proc::PROC_EVENT_HDR_LEN + data.len() * 4;
    let total = cn_proc::NLMSG_HDRLEN + cn_proc::CN_MSG_LEN + body;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.extend_from_slice(&cn_proc::NLMSG_DONE.to_le_bytes());
    buf.extend_from_slice(&[0; 10]); // flags, seq, pid
    buf.extend_from_slice(&cn_proc::CN_IDX_PROC.to_le_bytes());
    buf.extend_from_slice(&cn_proc::CN_VAL_PROC.to_le_bytes());
    buf.extend_from_slice(&[0; 8]); // seq, ack
    buf.extend_from_slice(&(body as u16).to_le_bytes());
    buf.extend_from_slice(&[0; 2]);
    buf.extend_from_slice(&what.to_le_bytes());
    buf.extend_from_slice(&[0; 12]); // cpu, timestamp
    for v in data {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

pub fn fork(child: u32) -> Vec<u8> {
    event_message(cn_proc::PROC_EVENT_FORK, &[1, 1, child, child])
}

pub fn exit(pid: u32, tgid: u32) -> Vec<u8> {
    event_message(cn_proc::PROC_EVENT_EXIT, &[pid, tgid, 0, 17])
}
