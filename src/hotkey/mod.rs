//! Global hotkey registration for starting clean mode
//!
//! The registrar owns a single system-wide hotkey that toggles clean mode
//! from anywhere. The underlying OS primitive has no pause, so disable and
//! enable are implemented as unregister and re-register from saved
//! parameters. The registrar is a control-thread-only object; backends must
//! treat the supplied callback as a cheap hand-off to the control thread
//! (the coordinator's callback is a channel post).

#[cfg(target_os = "macos")]
mod tap_backend;

#[cfg(target_os = "macos")]
pub use tap_backend::EventTapHotkeyBackend;

use std::sync::Arc;

use tracing::{debug, info};
#[cfg(not(target_os = "macos"))]
use tracing::warn;

use crate::keys::KeyCombination;

/// Errors from hotkey registration
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("failed to register global hotkey: {0}")]
    RegistrationFailed(String),

    #[error("cannot re-enable hotkey: no saved registration")]
    MissingSavedState,
}

/// Trait for hotkey registration backends (allows mocking in tests)
pub trait HotkeyBackend: Send + Sync {
    /// Install the system-wide hotkey; invokes `callback` on every press
    fn register(
        &self,
        combination: KeyCombination,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), HotkeyError>;

    /// Remove the hotkey; no-op when nothing is installed
    fn unregister(&self);
}

struct SavedRegistration {
    combination: KeyCombination,
    callback: Arc<dyn Fn() + Send + Sync>,
}

/// Manages the single toggle hotkey registration
pub struct HotkeyRegistrar {
    backend: Arc<dyn HotkeyBackend>,
    saved: Option<SavedRegistration>,
    registered: bool,
}

impl HotkeyRegistrar {
    pub fn new(backend: Arc<dyn HotkeyBackend>) -> Self {
        Self {
            backend,
            saved: None,
            registered: false,
        }
    }

    /// Register the hotkey, replacing any existing registration
    ///
    /// Parameters are saved even when the OS rejects the registration so a
    /// later `enable` can retry.
    pub fn register(
        &mut self,
        combination: KeyCombination,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), HotkeyError> {
        if self.registered {
            self.backend.unregister();
            self.registered = false;
        }

        self.saved = Some(SavedRegistration {
            combination,
            callback: Arc::clone(&callback),
        });

        self.backend.register(combination, callback)?;
        self.registered = true;
        info!(combination = %combination, "hotkey registered");
        Ok(())
    }

    /// Remove the registration; idempotent
    pub fn unregister(&mut self) {
        if self.registered {
            self.backend.unregister();
            self.registered = false;
            debug!("hotkey unregistered");
        }
    }

    /// Temporarily remove the registration, keeping saved parameters
    pub fn disable(&mut self) {
        self.unregister();
        debug!("hotkey disabled");
    }

    /// Re-install the registration from saved parameters
    pub fn enable(&mut self) -> Result<(), HotkeyError> {
        if self.registered {
            return Ok(());
        }

        let saved = self.saved.as_ref().ok_or(HotkeyError::MissingSavedState)?;
        self.backend
            .register(saved.combination, Arc::clone(&saved.callback))?;
        self.registered = true;
        debug!(combination = %saved.combination, "hotkey enabled");
        Ok(())
    }

    /// Swap in a new combination, re-registering only if currently installed
    ///
    /// While disabled, this just updates the saved parameters so the next
    /// `enable` picks up the new combination.
    pub fn rebind(&mut self, combination: KeyCombination) -> Result<(), HotkeyError> {
        let saved = self.saved.as_mut().ok_or(HotkeyError::MissingSavedState)?;
        saved.combination = combination;

        if self.registered {
            let callback = Arc::clone(&saved.callback);
            self.backend.unregister();
            self.registered = false;
            self.backend.register(combination, callback)?;
            self.registered = true;
            info!(combination = %combination, "hotkey rebound");
        } else {
            debug!(combination = %combination, "hotkey rebind deferred until enable");
        }

        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

impl Drop for HotkeyRegistrar {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Create the hotkey backend for the current platform
pub fn create_hotkey_backend() -> Arc<dyn HotkeyBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(EventTapHotkeyBackend::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(UnsupportedBackend)
    }
}

/// Placeholder backend for platforms without a global hotkey primitive
#[cfg(not(target_os = "macos"))]
struct UnsupportedBackend;

#[cfg(not(target_os = "macos"))]
impl HotkeyBackend for UnsupportedBackend {
    fn register(
        &self,
        _combination: KeyCombination,
        _callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), HotkeyError> {
        warn!("global hotkeys are not available on this platform");
        Err(HotkeyError::RegistrationFailed(
            "global hotkeys are not available on this platform".to_string(),
        ))
    }

    fn unregister(&self) {}
}
