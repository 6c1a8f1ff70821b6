//! Init phase shared between the launcher, the event listener and shutdown.

use std::sync::atomic::{AtomicU8, Ordering};

/// Boot progress of the guest. Only ever moves forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitPhase {
    Booting = 0,
    Launching = 1,
    Launched = 2,
    PoweringOff = 3,
}

impl InitPhase {
    fn from_u8(v: u8) -> Self {
        debug_assert!(v <= 3, "invalid InitPhase: {v}");
        match v {
            0 => Self::Booting,
            1 => Self::Launching,
            2 => Self::Launched,
            _ => Self::PoweringOff,
        }
    }
}

impl std::fmt::Display for InitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Booting => f.write_str("booting"),
            Self::Launching => f.write_str("launching"),
            Self::Launched => f.write_str("launched"),
            Self::PoweringOff => f.write_str("powering-off"),
        }
    }
}

/// Atomically readable [`InitPhase`].
#[derive(Debug)]
pub struct SharedPhase(AtomicU8);

impl SharedPhase {
    pub fn new() -> Self {
        Self(AtomicU8::new(InitPhase::Booting as u8))
    }

    pub fn get(&self) -> InitPhase {
        InitPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` unless the phase is already at or past it.
    /// Returns the phase observed before the call.
    pub fn advance(&self, to: InitPhase) -> InitPhase {
        InitPhase::from_u8(self.0.fetch_max(to as u8, Ordering::AcqRel))
    }
}

impl Default for SharedPhase {
    fn default() -> Self {
        Self::new()
    }
}
