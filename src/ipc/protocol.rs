//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::keys::{KeyCombination, Modifiers};
use crate::state::CleanMode;

/// Requests from the menu bar app to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Flip clean mode
    Toggle,

    /// Enter clean mode
    StartCleanMode,

    /// Leave clean mode
    StopCleanMode,

    /// The settings window opened; the toggle hotkey must pause
    SettingsOpened,

    /// The settings window closed
    SettingsClosed,

    /// Replace the exit combination
    SetExitCombination { key_code: u32, modifiers: Modifiers },

    /// Enable or disable notifications
    SetNotificationsEnabled { enabled: bool },

    /// Enable or disable sound cues
    SetSoundEnabled { enabled: bool },

    /// Subscribe to state change notifications
    Subscribe,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Request accepted
    Ack,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// State event occurred
    StateEvent(StateEvent),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current mode
    pub mode: CleanMode,

    /// Exit combination currently in effect
    pub exit_combination: KeyCombination,

    /// Uptime in seconds
    pub uptime_secs: u64,
}
