//! Listen-only CGEventTap hotkey backend for macOS
//!
//! Watches key-down events system-wide and fires the registered callback on
//! an exact match of the toggle combination. Runs on a dedicated thread with
//! its own CFRunLoop; the callback is invoked between run-loop passes, never
//! inside the tap callback itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};
use tracing::{debug, error, info, warn};

use crate::keys::{KeyCombination, Modifiers};

use super::{HotkeyBackend, HotkeyError};

/// CGEventTap-based hotkey backend
pub struct EventTapHotkeyBackend {
    running: Arc<AtomicBool>,
    run_loop: Arc<Mutex<Option<CFRunLoop>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventTapHotkeyBackend {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            run_loop: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }
}

impl Default for EventTapHotkeyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HotkeyBackend for EventTapHotkeyBackend {
    fn register(
        &self,
        combination: KeyCombination,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), HotkeyError> {
        // The OS primitive has no replace; drop any existing registration
        self.unregister();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let run_loop_slot = Arc::clone(&self.run_loop);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                if let Err(e) = run_hotkey_loop(
                    combination,
                    callback,
                    Arc::clone(&running),
                    run_loop_slot,
                    ready_tx,
                ) {
                    error!(?e, "hotkey listener error");
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::RegistrationFailed(format!("failed to spawn listener thread: {}", e))
            })?;

        if let Ok(mut guard) = self.thread.lock() {
            *guard = Some(handle);
        }

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.unregister();
                Err(e)
            }
            Err(_) => {
                self.unregister();
                Err(HotkeyError::RegistrationFailed(
                    "listener thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    fn unregister(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Ok(slot) = self.run_loop.lock() {
            if let Some(ref run_loop) = *slot {
                run_loop.stop();
            }
        }

        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                let deadline = Instant::now() + Duration::from_secs(2);
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    warn!("hotkey listener thread did not stop in time");
                }
            }
        }
    }
}

impl Drop for EventTapHotkeyBackend {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Run the CFRunLoop with a listen-only event tap
fn run_hotkey_loop(
    combination: KeyCombination,
    callback: Arc<dyn Fn() + Send + Sync>,
    running: Arc<AtomicBool>,
    run_loop_slot: Arc<Mutex<Option<CFRunLoop>>>,
    ready_tx: std_mpsc::Sender<Result<(), HotkeyError>>,
) -> Result<(), HotkeyError> {
    // Channel from the tap callback; the hotkey callback itself runs
    // between run-loop passes, off the event-delivery path
    let (hit_tx, hit_rx) = std_mpsc::channel::<()>();

    let tap_callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
          -> Option<CGEvent> {
        if let CGEventType::KeyDown = event_type {
            let key_code =
                event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32;
            let modifiers = Modifiers::from_event_flags(event.get_flags().bits());

            if combination.matches_event(key_code, modifiers) {
                let _ = hit_tx.send(());
            }
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        tap_callback,
    ) {
        Ok(tap) => tap,
        Err(_) => {
            let message =
                "failed to create event tap - check Accessibility permissions".to_string();
            let _ = ready_tx.send(Err(HotkeyError::RegistrationFailed(message.clone())));
            return Err(HotkeyError::RegistrationFailed(message));
        }
    };

    tap.enable();

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            let message = "failed to create run loop source".to_string();
            let _ = ready_tx.send(Err(HotkeyError::RegistrationFailed(message.clone())));
            return Err(HotkeyError::RegistrationFailed(message));
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    if let Ok(mut slot) = run_loop_slot.lock() {
        *slot = Some(run_loop.clone());
    }

    info!(combination = %combination, "hotkey listener started");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopDefaultMode },
            Duration::from_millis(100),
            true,
        );

        while hit_rx.try_recv().is_ok() {
            debug!("toggle hotkey pressed");
            callback();
        }
    }

    if let Ok(mut slot) = run_loop_slot.lock() {
        *slot = None;
    }

    // Tap and source are released when they go out of scope
    info!("hotkey listener stopped");
    Ok(())
}
