//! Blocking CGEventTap implementation of the input hook
//!
//! Uses raw CGEventTapCreate FFI because the event mask must include
//! NX_SYSDEFINED (media keys) and the callback must be able to consume
//! events by returning null, neither of which the safe wrapper exposes.
//! The tap runs on a dedicated thread with its own CFRunLoop; macOS
//! delivers events serially on that thread, so the classifier state needs
//! no synchronization.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use core_foundation::base::TCFType;
use core_foundation::mach_port::{CFMachPort, CFMachPortRef};
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource};
use core_graphics::event::{
    CGEvent, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventTapProxy,
    CGEventType, EventField,
};
use foreign_types::ForeignType;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::keys::{KeyCombination, Modifiers};

use super::classify::{Classifier, ExitSignal, TapEvent};
use super::{HookError, InputHook};

// Raw CGEventType values (the enum does not cover NX_SYSDEFINED)
const KEY_DOWN: u32 = 10;
const KEY_UP: u32 = 11;
const FLAGS_CHANGED: u32 = 12;
const NX_SYSDEFINED: u32 = 14;
const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;

type CGEventMask = u64;

type RawTapCallback = unsafe extern "C" fn(
    proxy: CGEventTapProxy,
    event_type: CGEventType,
    event: *mut c_void,
    user_info: *mut c_void,
) -> *mut c_void;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: CGEventMask,
        callback: RawTapCallback,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortInvalidate(port: CFMachPortRef);
}

/// State owned by the tap thread and touched only from its callback
struct TapState {
    classifier: Classifier,
    signal_tx: mpsc::Sender<ExitSignal>,
    /// Set after tap creation so the callback can re-enable on timeout
    tap_port: CFMachPortRef,
}

/// Blocking event tap input hook
pub struct EventTapHook {
    running: Arc<AtomicBool>,
    run_loop: Arc<Mutex<Option<CFRunLoop>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventTapHook {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            run_loop: Arc::new(Mutex::new(None)),
            thread: Mutex::new(None),
        }
    }
}

impl Default for EventTapHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for EventTapHook {
    fn start(
        &self,
        exit_combination: KeyCombination,
        signal_tx: mpsc::Sender<ExitSignal>,
    ) -> Result<(), HookError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }

        let running = Arc::clone(&self.running);
        let run_loop_slot = Arc::clone(&self.run_loop);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = thread::Builder::new()
            .name("clean-mode-tap".to_string())
            .spawn(move || {
                if let Err(e) = run_tap_loop(
                    exit_combination,
                    signal_tx,
                    Arc::clone(&running),
                    run_loop_slot,
                    ready_tx,
                ) {
                    error!(?e, "keyboard interception error");
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HookError::ThreadSpawn(e.to_string())
            })?;

        if let Ok(mut guard) = self.thread.lock() {
            *guard = Some(handle);
        }

        // Block briefly for the tap creation outcome so permission failures
        // surface to the caller instead of being logged on the tap thread.
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(HookError::ThreadSpawn(
                    "interception thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Ok(slot) = self.run_loop.lock() {
            if let Some(ref run_loop) = *slot {
                run_loop.stop();
            }
        }

        // Wait for the tap thread so teardown is complete before returning
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                let deadline = Instant::now() + Duration::from_secs(2);
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    warn!("interception thread did not stop in time");
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for EventTapHook {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns every tap sub-resource; dropping it always performs full teardown
/// (disable tap, remove run-loop source, invalidate mach port, free state),
/// so no error path can leave a partially released registration behind.
struct TapGuard {
    mach_port: CFMachPort,
    source: Option<CFRunLoopSource>,
    run_loop: CFRunLoop,
    state_ptr: *mut TapState,
}

impl Drop for TapGuard {
    fn drop(&mut self) {
        unsafe {
            CGEventTapEnable(self.mach_port.as_concrete_TypeRef(), false);
        }
        if let Some(source) = self.source.take() {
            self.run_loop
                .remove_source(&source, unsafe { kCFRunLoopDefaultMode });
        }
        unsafe {
            CFMachPortInvalidate(self.mach_port.as_concrete_TypeRef());
            drop(Box::from_raw(self.state_ptr));
        }
    }
}

/// Tap callback, executed synchronously for every observed event
///
/// Returns the event pointer to pass it through, null to consume it.
/// Must stay fast and non-blocking; the only side effect is a non-blocking
/// channel post of the exit signal.
unsafe extern "C" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    event_ref: *mut c_void,
    user_info: *mut c_void,
) -> *mut c_void {
    let state = &mut *(user_info as *mut TapState);
    let raw_type = event_type as u32;

    // A blocking tap that stalls gets disabled by the system; re-enable it
    // and let the synthetic notification event through.
    if raw_type == TAP_DISABLED_BY_TIMEOUT || raw_type == TAP_DISABLED_BY_USER_INPUT {
        warn!("event tap disabled by the system, re-enabling");
        if !state.tap_port.is_null() {
            CGEventTapEnable(state.tap_port, true);
        }
        return event_ref;
    }

    // Borrow the event without taking ownership
    let event = ManuallyDrop::new(CGEvent::from_ptr(event_ref as *mut _));

    let verdict = match decode_event(raw_type, &event) {
        Some(tap_event) => state.classifier.classify(tap_event),
        None => return std::ptr::null_mut(),
    };

    if let Some(signal) = verdict.signal {
        if state.signal_tx.try_send(signal).is_err() {
            warn!("exit signal channel full or closed, signal dropped");
        }
    }

    if verdict.pass {
        event_ref
    } else {
        std::ptr::null_mut()
    }
}

/// Reduce a raw CGEvent to the classifier's event type
fn decode_event(raw_type: u32, event: &CGEvent) -> Option<TapEvent> {
    match raw_type {
        KEY_DOWN | KEY_UP => {
            let key_code =
                event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32;
            let modifiers = Modifiers::from_event_flags(event.get_flags().bits());
            if raw_type == KEY_DOWN {
                Some(TapEvent::KeyDown {
                    key_code,
                    modifiers,
                })
            } else {
                Some(TapEvent::KeyUp {
                    key_code,
                    modifiers,
                })
            }
        }
        FLAGS_CHANGED => Some(TapEvent::FlagsChanged {
            modifiers: Modifiers::from_event_flags(event.get_flags().bits()),
        }),
        NX_SYSDEFINED => Some(TapEvent::SystemDefined),
        _ => None,
    }
}

/// Create the tap, attach it to this thread's run loop, and pump events
/// until the running flag clears
fn run_tap_loop(
    exit_combination: KeyCombination,
    signal_tx: mpsc::Sender<ExitSignal>,
    running: Arc<AtomicBool>,
    run_loop_slot: Arc<Mutex<Option<CFRunLoop>>>,
    ready_tx: std_mpsc::Sender<Result<(), HookError>>,
) -> Result<(), HookError> {
    let event_mask: CGEventMask = (1 << KEY_DOWN as u64)
        | (1 << KEY_UP as u64)
        | (1 << FLAGS_CHANGED as u64)
        | (1 << NX_SYSDEFINED as u64);

    let state_ptr = Box::into_raw(Box::new(TapState {
        classifier: Classifier::new(exit_combination),
        signal_tx,
        tap_port: std::ptr::null_mut(),
    }));

    let tap_ref = unsafe {
        CGEventTapCreate(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            event_mask,
            tap_callback,
            state_ptr as *mut c_void,
        )
    };

    if tap_ref.is_null() {
        unsafe {
            drop(Box::from_raw(state_ptr));
        }
        let _ = ready_tx.send(Err(HookError::PermissionDenied));
        return Err(HookError::PermissionDenied);
    }

    unsafe {
        (*state_ptr).tap_port = tap_ref;
    }

    let mut guard = TapGuard {
        mach_port: unsafe { CFMachPort::wrap_under_create_rule(tap_ref) },
        source: None,
        run_loop: CFRunLoop::get_current(),
        state_ptr,
    };

    let source = match guard.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(_) => {
            let e = HookError::TapSetup("failed to create run loop source".to_string());
            let _ = ready_tx.send(Err(HookError::TapSetup(
                "failed to create run loop source".to_string(),
            )));
            return Err(e);
        }
    };

    guard
        .run_loop
        .add_source(&source, unsafe { kCFRunLoopDefaultMode });
    guard.source = Some(source);

    if let Ok(mut slot) = run_loop_slot.lock() {
        *slot = Some(guard.run_loop.clone());
    }

    unsafe {
        CGEventTapEnable(guard.mach_port.as_concrete_TypeRef(), true);
    }

    info!(combination = %exit_combination, "keyboard interception started");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopDefaultMode },
            Duration::from_millis(200),
            false,
        );
    }

    if let Ok(mut slot) = run_loop_slot.lock() {
        *slot = None;
    }

    info!("keyboard interception stopped");
    Ok(())
}
