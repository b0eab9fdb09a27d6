//! Accessibility permission checks
//!
//! Creating a blocking event tap requires the process to be trusted for
//! Accessibility. The check is queried at startup and again on every start
//! attempt, since the user can revoke trust at any time.

use std::sync::Arc;

use tracing::info;
#[cfg(not(target_os = "macos"))]
use tracing::warn;

/// Port for querying and requesting input interception permission
pub trait PermissionCheck: Send + Sync {
    /// Whether the process may create a blocking event tap right now
    fn is_input_interception_permitted(&self) -> bool;

    /// Ask the OS to show its grant dialog; returns the current status
    fn prompt_for_permission(&self) -> bool;

    /// Open the system settings pane where the user grants access
    fn open_settings(&self);
}

/// Create the permission check for the current platform
pub fn create_permission_check() -> Arc<dyn PermissionCheck> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(AccessibilityPermission)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(AlwaysDenied)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use core_foundation::base::TCFType;
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::string::CFString;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        pub fn AXIsProcessTrusted() -> bool;
        pub fn AXIsProcessTrustedWithOptions(
            options: core_foundation::dictionary::CFDictionaryRef,
        ) -> bool;
    }

    /// Check trust, optionally asking the system to show its grant dialog
    pub fn is_trusted(prompt: bool) -> bool {
        if !prompt {
            return unsafe { AXIsProcessTrusted() };
        }
        let key = CFString::new("AXTrustedCheckOptionPrompt");
        let options =
            CFDictionary::from_CFType_pairs(&[(key.as_CFType(), CFBoolean::true_value().as_CFType())]);
        unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
    }
}

/// AXIsProcessTrusted-backed permission check
#[cfg(target_os = "macos")]
struct AccessibilityPermission;

#[cfg(target_os = "macos")]
impl PermissionCheck for AccessibilityPermission {
    fn is_input_interception_permitted(&self) -> bool {
        macos::is_trusted(false)
    }

    fn prompt_for_permission(&self) -> bool {
        macos::is_trusted(true)
    }

    fn open_settings(&self) {
        info!("opening Accessibility privacy settings");
        let _ = std::process::Command::new("open")
            .arg("x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility")
            .spawn();
    }
}

/// Platforms without an interception primitive never grant permission
#[cfg(not(target_os = "macos"))]
struct AlwaysDenied;

#[cfg(not(target_os = "macos"))]
impl PermissionCheck for AlwaysDenied {
    fn is_input_interception_permitted(&self) -> bool {
        false
    }

    fn prompt_for_permission(&self) -> bool {
        warn!("input interception permission is not available on this platform");
        false
    }

    fn open_settings(&self) {}
}
