//! Logging setup for the guest.
//!
//! Lines go to stderr (the VM console) prefixed with kernel uptime, so they
//! line up with kernel messages on the same console.

use std::fmt;
use std::path::Path;

use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

const UPTIME_PATH: &str = "/proc/uptime";

struct Uptime;

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "[{:12.6}]", read_uptime(Path::new(UPTIME_PATH)))
    }
}

/// Seconds since boot, `0.0` if unavailable.
pub fn read_uptime(path: &Path) -> f64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| parse_uptime(&content))
        .unwrap_or(0.0)
}

/// `/proc/uptime` holds two values; the first is the uptime in seconds.
fn parse_uptime(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_timer(Uptime)
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}
