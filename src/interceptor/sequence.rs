//! Fallback exit sequence detection
//!
//! Counts consecutive presses of a single tracked key (Escape). The counter
//! has no time bound: only another key-down resets it. This gives users an
//! exit path that works even when the configured combination's modifiers
//! cannot be pressed (stuck key, forgotten remap).

use tracing::{debug, info};

use crate::keys::ESCAPE_KEY_CODE;

/// Consecutive presses required to trigger the fallback exit
pub const REQUIRED_PRESS_COUNT: u32 = 9;

/// Detector for the consecutive-press fallback exit sequence
///
/// Observes key-down events only; key-up and modifier-change events never
/// reach it. Immediately reusable after triggering.
#[derive(Debug)]
pub struct ExitSequenceDetector {
    tracked_key: u32,
    required: u32,
    count: u32,
}

impl ExitSequenceDetector {
    /// Create a detector tracking Escape with the standard press count
    pub fn new() -> Self {
        Self {
            tracked_key: ESCAPE_KEY_CODE,
            required: REQUIRED_PRESS_COUNT,
            count: 0,
        }
    }

    /// Observe a key-down event
    ///
    /// Returns `true` exactly when the required count is reached; the counter
    /// resets to zero at that point. Any non-tracked key-down interrupts the
    /// sequence and resets the counter.
    pub fn observe_key_down(&mut self, key_code: u32) -> bool {
        if key_code == self.tracked_key {
            self.count += 1;
            debug!(count = self.count, required = self.required, "escape press");

            if self.count >= self.required {
                info!("fallback exit sequence completed");
                self.count = 0;
                return true;
            }
        } else if self.count > 0 {
            debug!("fallback sequence interrupted, resetting counter");
            self.count = 0;
        }

        false
    }

    /// Clear any partial sequence
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Current consecutive-press count
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for ExitSequenceDetector {
    fn default() -> Self {
        Self::new()
    }
}
