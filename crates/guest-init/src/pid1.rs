//! PID 1 duties: signal dispositions and reaping orphans.
//!
//! Handlers are installed with `sigaction` so they stay in place after the
//! first delivery.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Consume a pending SIGTERM/SIGINT. Returns `true` at most once per signal.
pub fn take_shutdown_request() -> bool {
    SHUTDOWN_REQUESTED.swap(false, Ordering::SeqCst)
}

fn set_handler(sig: libc::c_int, handler: libc::sighandler_t) {
    // SAFETY: an all-zero sigaction is valid; handler and flags are set below.
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = handler;
    sa.sa_flags = libc::SA_RESTART;
    // SAFETY: sa is initialized and sig is a valid signal number.
    unsafe {
        libc::sigaction(sig, &sa, std::ptr::null_mut());
    }
}

/// SIGTERM and SIGINT request a power-off. SIGTTIN, SIGTTOU and SIGPIPE
/// are ignored.
///
/// SIGCHLD keeps its default disposition. Ignoring it would make the kernel
/// auto-reap children and break waiting on the bootstrap script.
pub fn setup_signal_handlers() {
    let shutdown = handle_shutdown_signal as *const () as libc::sighandler_t;
    set_handler(libc::SIGTERM, shutdown);
    set_handler(libc::SIGINT, shutdown);
    set_handler(libc::SIGTTIN, libc::SIG_IGN);
    set_handler(libc::SIGTTOU, libc::SIG_IGN);
    set_handler(libc::SIGPIPE, libc::SIG_IGN);
}

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Reap every exited child without blocking. Returns how many were reaped.
pub fn reap_zombies() -> usize {
    let mut reaped = 0;
    loop {
        // SAFETY: waitpid with a null status pointer is allowed.
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        // 0: children remain but none exited; -1: no children left.
        if pid <= 0 {
            return reaped;
        }
        reaped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_request_is_consumed_once() {
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        assert!(take_shutdown_request());
        assert!(!take_shutdown_request());
    }
}
