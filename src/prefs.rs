//! Runtime preferences shared between the IPC server and the coordinator
//!
//! The exit combination lives in a watch channel so the coordinator can
//! react to changes pushed over IPC; the feedback toggles are plain flags
//! read at the moment an effect would fire.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::info;

use crate::keys::KeyCombination;

struct PrefsInner {
    combination_tx: watch::Sender<KeyCombination>,
    notifications_enabled: RwLock<bool>,
    sound_enabled: RwLock<bool>,
}

/// Cloneable handle to the shared preferences
#[derive(Clone)]
pub struct Preferences {
    inner: Arc<PrefsInner>,
}

impl Preferences {
    pub fn new(exit_combination: KeyCombination) -> Self {
        let (combination_tx, _) = watch::channel(exit_combination);
        Self {
            inner: Arc::new(PrefsInner {
                combination_tx,
                notifications_enabled: RwLock::new(true),
                sound_enabled: RwLock::new(true),
            }),
        }
    }

    /// Current exit combination
    pub fn exit_combination(&self) -> KeyCombination {
        *self.inner.combination_tx.borrow()
    }

    /// Replace the exit combination, notifying watchers
    pub fn set_exit_combination(&self, combination: KeyCombination) {
        info!(combination = %combination, "exit combination updated");
        self.inner.combination_tx.send_replace(combination);
    }

    /// Subscribe to exit combination changes
    pub fn subscribe_combination(&self) -> watch::Receiver<KeyCombination> {
        self.inner.combination_tx.subscribe()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.inner
            .notifications_enabled
            .read()
            .map(|v| *v)
            .unwrap_or(true)
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        if let Ok(mut v) = self.inner.notifications_enabled.write() {
            *v = enabled;
        }
    }

    pub fn sound_enabled(&self) -> bool {
        self.inner.sound_enabled.read().map(|v| *v).unwrap_or(true)
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        if let Ok(mut v) = self.inner.sound_enabled.write() {
            *v = enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Modifiers, ESCAPE_KEY_CODE, KEY_CODE_L};

    fn default_combo() -> KeyCombination {
        KeyCombination::new(KEY_CODE_L, Modifiers::command_shift())
    }

    #[test]
    fn test_combination_update_visible_to_watchers() {
        let prefs = Preferences::new(default_combo());
        let rx = prefs.subscribe_combination();

        let new_combo = KeyCombination::new(ESCAPE_KEY_CODE, Modifiers::command_shift());
        prefs.set_exit_combination(new_combo);

        assert_eq!(prefs.exit_combination(), new_combo);
        assert_eq!(*rx.borrow(), new_combo);
    }

    #[test]
    fn test_feedback_flags_default_on() {
        let prefs = Preferences::new(default_combo());
        assert!(prefs.notifications_enabled());
        assert!(prefs.sound_enabled());

        prefs.set_sound_enabled(false);
        assert!(!prefs.sound_enabled());
        assert!(prefs.notifications_enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let prefs = Preferences::new(default_combo());
        let other = prefs.clone();

        other.set_notifications_enabled(false);
        assert!(!prefs.notifications_enabled());
    }
}
