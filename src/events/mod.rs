//! Events emitted as clean mode changes state
//!
//! Pushed to subscribed IPC clients so the menu bar app can track the
//! daemon's state and draw the cover windows.

use serde::{Deserialize, Serialize};

use crate::keys::KeyCombination;

/// Events emitted by the coordinator during transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Clean mode engaged; keyboard input is now suppressed
    CleanModeStarted {
        /// Number of covers opened, one per display
        overlay_count: usize,
    },

    /// Clean mode released
    CleanModeStopped {
        /// Duration in milliseconds that clean mode was active
        duration_ms: u64,
    },

    /// A start attempt was refused because input interception is not permitted
    PermissionRequired,

    /// The toggle hotkey was re-registered with a new combination
    HotkeyRebound { combination: KeyCombination },

    /// The UI client should open a cover over the given display
    CoverShown { display: u32, overlay: u64 },

    /// The UI client should close a cover, optionally with its fade effect
    CoverClosed { overlay: u64, animated: bool },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::CleanModeStarted { overlay_count } => {
                write!(f, "CLEAN_MODE_STARTED ({} covers)", overlay_count)
            }
            StateEvent::CleanModeStopped { duration_ms } => {
                write!(f, "CLEAN_MODE_STOPPED ({}ms)", duration_ms)
            }
            StateEvent::PermissionRequired => write!(f, "PERMISSION_REQUIRED"),
            StateEvent::HotkeyRebound { combination } => {
                write!(f, "HOTKEY_REBOUND ({})", combination)
            }
            StateEvent::CoverShown { display, overlay } => {
                write!(f, "COVER_SHOWN (display {}, overlay {})", display, overlay)
            }
            StateEvent::CoverClosed { overlay, animated } => {
                write!(f, "COVER_CLOSED (overlay {}, animated {})", overlay, animated)
            }
        }
    }
}
