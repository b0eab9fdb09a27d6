//! Clean mode state coordination
//!
//! A two-state coordinator (Inactive, Active) that owns the keyboard
//! interceptor, the cover overlays, and the toggle hotkey, and keeps the
//! three in lockstep across every transition.

mod coordinator;

pub use coordinator::{CleanMode, CleanModeCoordinator, Command};
