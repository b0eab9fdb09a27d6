//! User-facing feedback: notifications and sounds
//!
//! All effects are best-effort. Failures are logged and swallowed so a
//! missing sound file or a denied notification can never block a mode
//! transition.

use std::sync::Arc;

use tracing::{debug, warn};

/// Port for user notifications and sound cues
pub trait Effects: Send + Sync {
    /// Post a user notification
    fn notify(&self, title: &str, body: &str);

    /// Play a named system sound
    fn play_sound(&self, name: &str);
}

/// Sound cue for entering clean mode
pub const SOUND_START: &str = "Purr";
/// Sound cue for leaving clean mode
pub const SOUND_STOP: &str = "Pop";

/// Create the effects sink for the current platform
pub fn create_effects() -> Arc<dyn Effects> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(SystemEffects)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(NullEffects)
    }
}

/// Effects sink backed by `osascript` and `afplay`
///
/// Both commands are spawned without waiting; the child processes outlive
/// the call and exit on their own.
#[cfg(target_os = "macos")]
struct SystemEffects;

#[cfg(target_os = "macos")]
impl Effects for SystemEffects {
    fn notify(&self, title: &str, body: &str) {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            body.replace('"', "\\\""),
            title.replace('"', "\\\"")
        );
        match std::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .spawn()
        {
            Ok(_) => debug!(title, "notification posted"),
            Err(e) => warn!(?e, "failed to post notification"),
        }
    }

    fn play_sound(&self, name: &str) {
        let path = format!("/System/Library/Sounds/{}.aiff", name);
        match std::process::Command::new("afplay").arg(&path).spawn() {
            Ok(_) => debug!(sound = name, "sound played"),
            Err(e) => warn!(?e, sound = name, "failed to play sound"),
        }
    }
}

/// Effects sink that only logs, for platforms without system sounds
#[cfg(not(target_os = "macos"))]
struct NullEffects;

#[cfg(not(target_os = "macos"))]
impl Effects for NullEffects {
    fn notify(&self, title: &str, body: &str) {
        debug!(title, body, "notification (no-op)");
    }

    fn play_sound(&self, name: &str) {
        debug!(sound = name, "sound (no-op)");
    }
}
