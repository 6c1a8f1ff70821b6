//! Guest init process.
//!
//! Runs as PID 1 inside the VM guest. It launches the configured
//! applications once, watches them through the kernel process connector and
//! powers the VM off when the last one exits.
//!
//! Startup sequence:
//! 1. Load config, initialize logging
//! 2. Install PID 1 signal handlers
//! 3. Subscribe to process events (phase `Booting`)
//! 4. Run the busybox bootstrap script, if present
//! 5. Launch the applications (phase `Launching`, then `Launched`)
//! 6. Reap zombies until a shutdown is requested or triggered

mod config;
mod launch;
mod pid1;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use guest_supervisor::{
    InitPhase, LinuxPlatform, Listener, ProcFs, ProcessRegistry, Programs,
    RebootCommand, SharedPhase, ShutdownOrchestrator, SupervisorConfig, listener, logging,
};
use tracing::{debug, error, info, warn};

use crate::config::InitConfig;

const REAP_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    let path = config::config_path();
    let (config, config_error) = match InitConfig::load(&path) {
        Ok(config) => (config, None),
        Err(e) => (InitConfig::default(), Some(e)),
    };

    logging::init(config.supervisor.debug);
    if let Some(e) = config_error {
        warn!("{e}, using default configuration");
    }
    info!(pid = std::process::id(), programs = config.programs.len(), "guest-init starting");

    pid1::setup_signal_handlers();

    let phase = Arc::new(SharedPhase::new());
    let roster = Arc::new(launch::new_roster(&config.programs));
    let shutdown = Arc::new(ShutdownOrchestrator::new(
        Box::new(LinuxPlatform::new(&config.supervisor)),
        phase.clone(),
        &config.supervisor,
    ));

    start_listener(&config.supervisor, &phase, &roster, &shutdown);

    if let Err(e) = launch::run_bootstrap(&config.supervisor.bootstrap_script) {
        error!("{e}");
    }

    phase.advance(InitPhase::Launching);
    if let Err(e) = launch::spawn_programs(&config.programs, &roster) {
        shutdown.system_panic(&e.to_string());
    }
    phase.advance(InitPhase::Launched);

    if roster.is_empty() {
        info!("no programs configured");
        shutdown.run(RebootCommand::PowerOff, Duration::ZERO);
    }

    loop {
        let reaped = pid1::reap_zombies();
        if reaped > 0 {
            debug!(reaped, "reaped zombies");
        }

        if pid1::take_shutdown_request() {
            info!("shutdown requested");
            shutdown.run(RebootCommand::PowerOff, config.signal_grace());
        }

        thread::sleep(REAP_INTERVAL);
    }
}

/// Subscribe to process events and watch them on a background thread.
///
/// A listener that fails to start only stops the automatic power-off; the
/// guest keeps running its applications.
fn start_listener(
    config: &SupervisorConfig,
    phase: &Arc<SharedPhase>,
    roster: &Arc<Programs>,
    shutdown: &Arc<ShutdownOrchestrator>,
) {
    let mut internal_paths = config.internal_paths();
    match std::env::current_exe() {
        Ok(exe) => internal_paths.push(exe),
        Err(e) => warn!("can not resolve own executable: {e}"),
    }

    let registry = ProcessRegistry::new(
        internal_paths,
        Arc::new(ProcFs::new(&config.proc_root)),
        roster.clone(),
    );
    let listener = Listener::new(
        registry,
        phase.clone(),
        shutdown.clone(),
        config.recv_buffer_size,
    );

    // The thread stays detached; its loop only returns once shutdown is underway.
    if let Err(e) = listener::start(listener, std::process::id()) {
        error!("{e}");
    }
}
