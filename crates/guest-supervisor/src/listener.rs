//! Kernel process-connector listener.
//!
//! Subscribes to the proc connector multicast group and feeds every fork,
//! exec and exit event into the [`ProcessRegistry`]. This loop is the only
//! writer of the registry. It ends once the registry decides the workload is
//! done and the shutdown sequence has been started.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cn_proc::{CN_IDX_PROC, EventKind, McastOp, NLMSG_HDRLEN, ProcessEvent};
use tracing::{info, trace, warn};

use crate::error::SupervisorError;
use crate::phase::SharedPhase;
use crate::registry::{ProcessRegistry, ShutdownDecision};
use crate::shutdown::{RebootCommand, ShutdownOrchestrator};

/// Source of raw netlink datagrams.
pub trait EventSource {
    /// Block until a datagram arrives. `Ok(None)` means no more datagrams
    /// will ever arrive.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Netlink socket subscribed to the process connector.
#[derive(Debug)]
pub struct ConnectorSocket {
    fd: OwnedFd,
}

impl ConnectorSocket {
    /// Create the socket, bind it to the proc connector group with
    /// `port_id` as our netlink port, and send the subscribe request.
    pub fn open(port_id: u32) -> Result<Self, SupervisorError> {
        // SAFETY: plain socket(2) call with constant arguments; checked below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_CONNECTOR,
            )
        };
        if raw < 0 {
            return Err(SupervisorError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: raw is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let local = netlink_addr(port_id, CN_IDX_PROC);
        // SAFETY: fd is a valid socket and local is a fully initialized
        // sockaddr_nl whose size is passed alongside.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &local as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(SupervisorError::Bind(io::Error::last_os_error()));
        }

        let request = cn_proc::encode_subscribe(McastOp::Listen, 1, port_id);
        let kernel = netlink_addr(0, CN_IDX_PROC);
        // SAFETY: request outlives the call and its length is passed; kernel
        // is a fully initialized sockaddr_nl.
        let sent = unsafe {
            libc::sendto(
                fd.as_raw_fd(),
                request.as_ptr().cast(),
                request.len(),
                0,
                &kernel as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(SupervisorError::Subscribe(io::Error::last_os_error()));
        }

        Ok(Self { fd })
    }
}

impl EventSource for ConnectorSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut from = netlink_addr(u32::MAX, 0);
        let mut from_len = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        // SAFETY: buf and from are valid for writes of the lengths passed.
        let n = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                &mut from as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut from_len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if from.nl_pid != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message not sent by the kernel (port {})", from.nl_pid),
            ));
        }
        let n = n as usize;
        if n < NLMSG_HDRLEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("number of bytes too small, received {n} bytes"),
            ));
        }
        Ok(Some(n))
    }
}

fn netlink_addr(pid: u32, groups: u32) -> libc::sockaddr_nl {
    // SAFETY: sockaddr_nl is plain data; all-zero is valid (nl_pad must be 0).
    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_pid = pid;
    addr.nl_groups = groups;
    addr
}

/// Why [`Listener::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    ShutdownTriggered,
    SourceClosed,
}

pub struct Listener {
    registry: ProcessRegistry,
    phase: Arc<SharedPhase>,
    shutdown: Arc<ShutdownOrchestrator>,
    buffer_size: usize,
}

impl Listener {
    pub fn new(
        registry: ProcessRegistry,
        phase: Arc<SharedPhase>,
        shutdown: Arc<ShutdownOrchestrator>,
        buffer_size: usize,
    ) -> Self {
        Self {
            registry,
            phase,
            shutdown,
            buffer_size,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Receive and dispatch events until shutdown is triggered.
    ///
    /// Receive errors are logged and the loop keeps going.
    pub fn run<S: EventSource>(&mut self, source: &mut S) -> ListenerExit {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let n = match source.recv(&mut buf) {
                Ok(Some(n)) => n,
                Ok(None) => {
                    info!("process event source closed");
                    return ListenerExit::SourceClosed;
                }
                Err(e) => {
                    warn!("error receiving netlink message: {e}");
                    continue;
                }
            };

            // n <= buf.len() is guaranteed by recv()
            for event in cn_proc::decode_events(buf.get(..n).unwrap_or_default()) {
                if self.dispatch(event) == ShutdownDecision::TriggerShutdown {
                    self.shutdown.run(RebootCommand::PowerOff, Duration::ZERO);
                    return ListenerExit::ShutdownTriggered;
                }
            }
        }
    }

    fn dispatch(&mut self, event: ProcessEvent) -> ShutdownDecision {
        trace!(?event, "process event");
        match event.kind {
            EventKind::Fork | EventKind::Exec => {
                self.registry.on_fork_or_exec(event.pid, event.tgid);
                ShutdownDecision::NoAction
            }
            EventKind::Exit { .. } => self.registry.on_exit(event.pid, event.tgid, self.phase.get()),
        }
    }
}

/// Subscribe to the kernel on the calling thread, then run `listener` on a
/// dedicated thread.
///
/// Subscribing first means no event of a process started after this returns
/// can be missed. Transport failures are returned without retrying.
pub fn start(
    mut listener: Listener,
    port_id: u32,
) -> Result<JoinHandle<ListenerExit>, SupervisorError> {
    let mut socket = ConnectorSocket::open(port_id)?;
    info!(port_id, "listening for process events");
    thread::Builder::new()
        .name("cn-proc".into())
        .spawn(move || listener.run(&mut socket))
        .map_err(SupervisorError::Thread)
}
