//! System-wide keyboard interception for clean mode
//!
//! While clean mode is active, a blocking CGEventTap observes every keyboard
//! and media-key event and decides pass-through vs. suppress. The only events
//! allowed through are presses of the configured exit combination; exit
//! triggers are posted asynchronously to the coordinator, which owns the
//! hook's lifecycle (the hook never stops itself).

mod classify;
mod sequence;
#[cfg(target_os = "macos")]
mod tap;

pub use classify::{Classifier, ExitSignal, TapEvent, Verdict};
pub use sequence::{ExitSequenceDetector, REQUIRED_PRESS_COUNT};
#[cfg(target_os = "macos")]
pub use tap::EventTapHook;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::keys::KeyCombination;

/// Errors from starting or running the keyboard interceptor
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to create event tap - check Accessibility permissions")]
    PermissionDenied,

    #[error("keyboard interceptor is already running")]
    AlreadyRunning,

    #[error("failed to spawn interception thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to set up event tap: {0}")]
    TapSetup(String),

    #[error("keyboard interception is not available on this platform")]
    Unavailable,
}

/// Port for the privileged system-wide interception primitive
///
/// `start` captures an immutable snapshot of the exit combination; changing
/// preferences afterwards does not affect a running hook. Exit signals are
/// delivered through `signal_tx` with a non-blocking post so no coordinator
/// logic ever runs on the interception thread.
pub trait InputHook: Send + Sync {
    /// Begin intercepting all keyboard input
    fn start(
        &self,
        exit_combination: KeyCombination,
        signal_tx: mpsc::Sender<ExitSignal>,
    ) -> Result<(), HookError>;

    /// Release the interception registration and its run-loop source
    ///
    /// Idempotent, and safe to call after a partially failed `start`.
    fn stop(&self);

    /// Whether the interceptor currently holds a live tap
    fn is_running(&self) -> bool;
}

/// Create the input hook for the current platform
pub fn create_input_hook() -> Arc<dyn InputHook> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(EventTapHook::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(UnsupportedHook)
    }
}

/// Placeholder hook for platforms without an interception primitive
#[cfg(not(target_os = "macos"))]
struct UnsupportedHook;

#[cfg(not(target_os = "macos"))]
impl InputHook for UnsupportedHook {
    fn start(
        &self,
        _exit_combination: KeyCombination,
        _signal_tx: mpsc::Sender<ExitSignal>,
    ) -> Result<(), HookError> {
        Err(HookError::Unavailable)
    }

    fn stop(&self) {}

    fn is_running(&self) -> bool {
        false
    }
}
