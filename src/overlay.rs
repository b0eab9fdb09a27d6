//! Overlay windowing port
//!
//! The daemon never draws windows itself; it asks this port for one opaque,
//! topmost cover per connected display and releases the handles on stop.
//! The production implementation forwards cover commands to the subscribed
//! menu bar app over IPC, which owns the actual NSWindow rendering.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::warn;

use crate::events::StateEvent;

/// CGDirectDisplayID of a connected display
pub type DisplayId = u32;

/// Opaque handle to one open cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub u64);

/// Errors from cover creation
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("failed to create cover for display {display}: {message}")]
    CreateFailed { display: DisplayId, message: String },
}

/// Port to the windowing collaborator
pub trait Overlays: Send + Sync {
    /// Ids of all connected displays
    fn displays(&self) -> Vec<DisplayId>;

    /// Open a full-bounds cover over the given display
    fn create_cover(&self, display: DisplayId) -> Result<OverlayHandle, OverlayError>;

    /// Close a cover immediately
    fn close(&self, handle: OverlayHandle);

    /// Close a cover with the collaborator's fade effect, if it has one
    fn close_animated(&self, handle: OverlayHandle) {
        self.close(handle);
    }
}

/// Overlay port that drives the UI client through the state event stream
///
/// Cover commands are fire-and-forget broadcasts; handle ids let the client
/// correlate show and close. Display enumeration is local so the cover count
/// matches the machine the daemon runs on even with no client connected.
pub struct IpcOverlays {
    event_tx: broadcast::Sender<StateEvent>,
    next_id: AtomicU64,
}

impl IpcOverlays {
    pub fn new(event_tx: broadcast::Sender<StateEvent>) -> Self {
        Self {
            event_tx,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Overlays for IpcOverlays {
    fn displays(&self) -> Vec<DisplayId> {
        #[cfg(target_os = "macos")]
        {
            use core_graphics::display::CGDisplay;
            match CGDisplay::active_displays() {
                Ok(displays) => displays,
                Err(e) => {
                    warn!(error = e, "display enumeration failed, using main display");
                    vec![CGDisplay::main().id]
                }
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            vec![0]
        }
    }

    fn create_cover(&self, display_id: DisplayId) -> Result<OverlayHandle, OverlayError> {
        let handle = OverlayHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        if self
            .event_tx
            .send(StateEvent::CoverShown {
                display: display_id,
                overlay: handle.0,
            })
            .is_err()
        {
            warn!(display = display_id, "no IPC client subscribed, cover will not be drawn");
        }
        Ok(handle)
    }

    fn close(&self, handle: OverlayHandle) {
        let _ = self.event_tx.send(StateEvent::CoverClosed {
            overlay: handle.0,
            animated: false,
        });
    }

    fn close_animated(&self, handle: OverlayHandle) {
        let _ = self.event_tx.send(StateEvent::CoverClosed {
            overlay: handle.0,
            animated: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let (event_tx, _event_rx) = broadcast::channel(16);
        let overlays = IpcOverlays::new(event_tx);

        let a = overlays.create_cover(1).unwrap();
        let b = overlays.create_cover(2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cover_events_broadcast() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let overlays = IpcOverlays::new(event_tx);

        let handle = overlays.create_cover(7).unwrap();
        overlays.close_animated(handle);

        match event_rx.try_recv().unwrap() {
            StateEvent::CoverShown { display, overlay } => {
                assert_eq!(display, 7);
                assert_eq!(overlay, handle.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match event_rx.try_recv().unwrap() {
            StateEvent::CoverClosed { overlay, animated } => {
                assert_eq!(overlay, handle.0);
                assert!(animated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
