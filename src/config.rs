//! Configuration loading and management

use std::path::PathBuf;

use anyhow::Result;

use crate::keys::{KeyCombination, Modifiers, KEY_CODE_L};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Exit combination used until a client pushes a different one
    pub default_exit_combination: KeyCombination,

    /// Initial notification preference
    pub notifications_enabled: bool,

    /// Initial sound cue preference
    pub sound_enabled: bool,
}

/// Parse an on/off environment override, defaulting to on
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => !matches!(value.as_str(), "0" | "false" | "off"),
        Err(_) => true,
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = match std::env::var("SCREEN_CLEANER_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => PathBuf::from(&home)
                .join(".local")
                .join("share")
                .join("screen-cleaner"),
        };

        let socket_path = match std::env::var("SCREEN_CLEANER_SOCKET") {
            Ok(path) => PathBuf::from(path),
            Err(_) => data_dir.join("daemon.sock"),
        };

        Ok(Self {
            socket_path,
            data_dir,
            // Command+Shift+L, matching the menu bar app's default
            default_exit_combination: KeyCombination::new(KEY_CODE_L, Modifiers::command_shift()),
            notifications_enabled: env_flag("SCREEN_CLEANER_NOTIFICATIONS"),
            sound_enabled: env_flag("SCREEN_CLEANER_SOUNDS"),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
