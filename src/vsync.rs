//! Vsync event gate
//!
//! Records whether the host currently wants vsync events. `event_control`
//! writes it and whatever delivers vsync reads it, possibly from different
//! threads, so every access goes through one mutex.

use std::sync::{Mutex, PoisonError};

/// Shared flag guarding vsync delivery
#[derive(Debug)]
pub struct VsyncGate {
    enabled: Mutex<bool>,
}

impl VsyncGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Mutex::new(enabled),
        }
    }

    /// Store the host's choice
    pub fn set_enabled(&self, enabled: bool) {
        // A panic elsewhere cannot leave a bool half-written.
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner) = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VsyncGate {
    /// Vsync callbacks start out enabled
    fn default() -> Self {
        Self::new(true)
    }
}
