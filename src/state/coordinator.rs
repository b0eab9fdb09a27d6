//! Core clean mode coordinator
//!
//! All transitions run on the coordinator's task; the interception thread,
//! the hotkey listener, and IPC clients only post commands and signals into
//! its channels. Entering clean mode acquires the keyboard hook, the cover
//! overlays, and the hotkey pause as a unit; a failure anywhere rolls back
//! whatever was already acquired so the system never ends up half-entered.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::effects::{Effects, SOUND_START, SOUND_STOP};
use crate::events::StateEvent;
use crate::hotkey::{HotkeyBackend, HotkeyRegistrar};
use crate::interceptor::{ExitSignal, HookError, InputHook};
use crate::keys::KeyCombination;
use crate::overlay::{OverlayHandle, Overlays};
use crate::permission::PermissionCheck;
use crate::prefs::Preferences;

/// The two possible states of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanMode {
    /// Keyboard works normally, toggle hotkey armed
    Inactive,
    /// Keyboard suppressed, covers up
    Active,
}

impl Default for CleanMode {
    fn default() -> Self {
        Self::Inactive
    }
}

impl std::fmt::Display for CleanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanMode::Inactive => write!(f, "Inactive"),
            CleanMode::Active => write!(f, "Active"),
        }
    }
}

/// Commands posted to the coordinator from IPC clients and the hotkey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Flip between Inactive and Active
    Toggle,
    /// Enter clean mode; no-op when already active
    Start,
    /// Leave clean mode; no-op when already inactive
    Stop,
    /// The settings window opened; pause the toggle hotkey
    SettingsOpened,
    /// The settings window closed; re-arm the toggle hotkey
    SettingsClosed,
    /// Leave clean mode if needed and end the run loop
    Shutdown,
}

/// The coordinator that manages clean mode transitions
pub struct CleanModeCoordinator {
    mode: CleanMode,
    overlays: Vec<OverlayHandle>,
    hook: Arc<dyn InputHook>,
    registrar: HotkeyRegistrar,
    overlay_port: Arc<dyn Overlays>,
    permission: Arc<dyn PermissionCheck>,
    effects: Arc<dyn Effects>,
    prefs: Preferences,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
    /// Handle given to the hotkey callback for posting Toggle
    command_tx: mpsc::Sender<Command>,
    exit_tx: mpsc::Sender<ExitSignal>,
    exit_rx: Option<mpsc::Receiver<ExitSignal>>,
    combination_rx: Option<watch::Receiver<KeyCombination>>,
    settings_open: bool,
    /// Time when Active was entered
    entered_at: Option<Instant>,
}

impl CleanModeCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hook: Arc<dyn InputHook>,
        hotkey_backend: Arc<dyn HotkeyBackend>,
        overlay_port: Arc<dyn Overlays>,
        permission: Arc<dyn PermissionCheck>,
        effects: Arc<dyn Effects>,
        prefs: Preferences,
        event_tx: broadcast::Sender<StateEvent>,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::channel(8);
        let combination_rx = prefs.subscribe_combination();
        Self {
            mode: CleanMode::Inactive,
            overlays: Vec::new(),
            hook,
            registrar: HotkeyRegistrar::new(hotkey_backend),
            overlay_port,
            permission,
            effects,
            prefs,
            event_tx,
            command_tx,
            exit_tx,
            exit_rx: Some(exit_rx),
            combination_rx: Some(combination_rx),
            settings_open: false,
            entered_at: None,
        }
    }

    /// Get the current mode
    pub fn mode(&self) -> CleanMode {
        self.mode
    }

    /// Register the system-wide toggle hotkey
    ///
    /// The callback only posts `Command::Toggle`; the transition itself runs
    /// on the coordinator task.
    pub fn register_toggle_hotkey(&mut self) -> Result<(), crate::hotkey::HotkeyError> {
        let command_tx = self.command_tx.clone();
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            if command_tx.try_send(Command::Toggle).is_err() {
                warn!("command channel full, toggle hotkey press dropped");
            }
        });
        self.registrar
            .register(self.prefs.exit_combination(), callback)
    }

    /// Run the coordinator, processing commands, exit signals, and
    /// preference changes until `Command::Shutdown` arrives
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<Command>) {
        info!("coordinator started in Inactive mode");

        if !self.permission.is_input_interception_permitted() {
            warn!("input interception permission not granted yet");
            let _ = self.event_tx.send(StateEvent::PermissionRequired);
            self.permission.prompt_for_permission();
        }

        let mut exit_rx = match self.exit_rx.take() {
            Some(rx) => rx,
            None => {
                error!("coordinator run loop started twice");
                return;
            }
        };
        let mut combination_rx = match self.combination_rx.take() {
            Some(rx) => rx,
            None => {
                error!("coordinator run loop started twice");
                return;
            }
        };

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            info!("command channel closed");
                            break;
                        }
                    }
                }
                signal = exit_rx.recv() => {
                    if let Some(signal) = signal {
                        self.handle_exit_signal(signal);
                    }
                }
                changed = combination_rx.changed() => {
                    if changed.is_ok() {
                        let combination = *combination_rx.borrow_and_update();
                        self.handle_combination_changed(combination);
                    }
                }
            }
        }

        info!("coordinator stopped");
    }

    /// Handle one command; returns false when the run loop should end
    pub fn handle_command(&mut self, command: Command) -> bool {
        debug!(?command, mode = %self.mode, "handling command");
        match command {
            Command::Toggle => self.toggle(),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::SettingsOpened => self.on_settings_opened(),
            Command::SettingsClosed => self.on_settings_closed(),
            Command::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn toggle(&mut self) {
        match self.mode {
            CleanMode::Inactive => self.start(),
            CleanMode::Active => self.stop(),
        }
    }

    /// Enter clean mode: hook first, then covers, then hotkey pause
    fn start(&mut self) {
        if self.mode == CleanMode::Active {
            warn!("start ignored, already active");
            return;
        }

        if !self.permission.is_input_interception_permitted() {
            warn!("cannot start clean mode, input interception not permitted");
            let _ = self.event_tx.send(StateEvent::PermissionRequired);
            self.permission.prompt_for_permission();
            if self.prefs.notifications_enabled() {
                self.effects.notify(
                    "Screen Cleaner",
                    "Grant Accessibility access to use clean mode",
                );
            }
            return;
        }

        let combination = self.prefs.exit_combination();
        if let Err(e) = self.hook.start(combination, self.exit_tx.clone()) {
            error!(?e, "failed to start keyboard interception");
            if matches!(e, HookError::PermissionDenied) {
                let _ = self.event_tx.send(StateEvent::PermissionRequired);
                self.permission.open_settings();
            }
            return;
        }

        let displays = self.overlay_port.displays();
        let mut handles = Vec::with_capacity(displays.len());
        for display in displays {
            match self.overlay_port.create_cover(display) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(?e, "failed to cover a display, rolling back");
                    for handle in handles.drain(..) {
                        self.overlay_port.close(handle);
                    }
                    self.hook.stop();
                    return;
                }
            }
        }

        self.registrar.disable();

        let overlay_count = handles.len();
        self.overlays = handles;
        self.mode = CleanMode::Active;
        self.entered_at = Some(Instant::now());

        info!(
            overlay_count,
            combination = %combination,
            "clean mode started"
        );
        let _ = self
            .event_tx
            .send(StateEvent::CleanModeStarted { overlay_count });

        if self.prefs.sound_enabled() {
            self.effects.play_sound(SOUND_START);
        }
        if self.prefs.notifications_enabled() {
            self.effects.notify(
                "Clean mode on",
                &format!("Press {} or Escape 9 times to exit", combination),
            );
        }
    }

    /// Leave clean mode, releasing resources in reverse acquisition order
    fn stop(&mut self) {
        if self.mode == CleanMode::Inactive {
            warn!("stop ignored, already inactive");
            return;
        }

        self.hook.stop();

        for handle in self.overlays.drain(..) {
            self.overlay_port.close_animated(handle);
        }

        if self.settings_open {
            debug!("settings open, leaving hotkey disabled");
        } else if let Err(e) = self.registrar.enable() {
            error!(?e, "failed to re-arm toggle hotkey");
        }

        let duration_ms = self
            .entered_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.mode = CleanMode::Inactive;

        info!(duration_ms, "clean mode stopped");
        let _ = self
            .event_tx
            .send(StateEvent::CleanModeStopped { duration_ms });

        if self.prefs.sound_enabled() {
            self.effects.play_sound(SOUND_STOP);
        }
    }

    fn handle_exit_signal(&mut self, signal: ExitSignal) {
        if self.mode != CleanMode::Active {
            debug!(signal = %signal, "stale exit signal ignored");
            return;
        }
        info!(signal = %signal, "exit requested from keyboard");
        self.stop();
    }

    /// Apply a new combination to the hotkey registration
    ///
    /// A running interception session keeps the combination it started with;
    /// the new one takes effect on the next start.
    fn handle_combination_changed(&mut self, combination: KeyCombination) {
        match self.registrar.rebind(combination) {
            Ok(()) => {
                let _ = self.event_tx.send(StateEvent::HotkeyRebound { combination });
            }
            Err(e) => error!(?e, "failed to rebind toggle hotkey"),
        }
    }

    fn on_settings_opened(&mut self) {
        self.settings_open = true;
        self.registrar.disable();
        debug!("settings opened, toggle hotkey paused");
    }

    fn on_settings_closed(&mut self) {
        self.settings_open = false;
        if self.mode == CleanMode::Inactive {
            if let Err(e) = self.registrar.enable() {
                error!(?e, "failed to re-arm toggle hotkey");
            }
        }
        debug!("settings closed");
    }

    fn shutdown(&mut self) {
        info!("coordinator shutting down");
        if self.mode == CleanMode::Active {
            self.stop();
        }
        self.registrar.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::HotkeyError;
    use crate::keys::{Modifiers, KEY_CODE_L};
    use crate::overlay::{DisplayId, OverlayError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockHook {
        running: AtomicBool,
        deny: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        started_with: Mutex<Option<KeyCombination>>,
        signal_tx: Mutex<Option<mpsc::Sender<ExitSignal>>>,
    }

    impl MockHook {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(false),
                deny: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                started_with: Mutex::new(None),
                signal_tx: Mutex::new(None),
            })
        }

        fn started_combination(&self) -> Option<KeyCombination> {
            *self.started_with.lock().unwrap()
        }
    }

    impl InputHook for MockHook {
        fn start(
            &self,
            exit_combination: KeyCombination,
            signal_tx: mpsc::Sender<ExitSignal>,
        ) -> Result<(), HookError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                return Err(HookError::PermissionDenied);
            }
            *self.started_with.lock().unwrap() = Some(exit_combination);
            *self.signal_tx.lock().unwrap() = Some(signal_tx);
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    struct MockOverlays {
        display_count: usize,
        fail_at: Option<usize>,
        created: AtomicUsize,
        open: Mutex<Vec<OverlayHandle>>,
    }

    impl MockOverlays {
        fn new(display_count: usize) -> Arc<Self> {
            Arc::new(Self {
                display_count,
                fail_at: None,
                created: AtomicUsize::new(0),
                open: Mutex::new(Vec::new()),
            })
        }

        fn failing_at(display_count: usize, fail_at: usize) -> Arc<Self> {
            Arc::new(Self {
                display_count,
                fail_at: Some(fail_at),
                created: AtomicUsize::new(0),
                open: Mutex::new(Vec::new()),
            })
        }

        fn open_count(&self) -> usize {
            self.open.lock().unwrap().len()
        }
    }

    impl Overlays for MockOverlays {
        fn displays(&self) -> Vec<DisplayId> {
            (0..self.display_count as u32).collect()
        }

        fn create_cover(&self, display: DisplayId) -> Result<OverlayHandle, OverlayError> {
            let index = self.created.fetch_add(1, Ordering::SeqCst);
            if Some(index) == self.fail_at {
                return Err(OverlayError::CreateFailed {
                    display,
                    message: "no window server".to_string(),
                });
            }
            let handle = OverlayHandle(index as u64 + 1);
            self.open.lock().unwrap().push(handle);
            Ok(handle)
        }

        fn close(&self, handle: OverlayHandle) {
            self.open.lock().unwrap().retain(|h| *h != handle);
        }
    }

    struct MockPermission {
        granted: AtomicBool,
        prompts: AtomicUsize,
    }

    impl MockPermission {
        fn granted() -> Arc<Self> {
            Arc::new(Self {
                granted: AtomicBool::new(true),
                prompts: AtomicUsize::new(0),
            })
        }

        fn denied() -> Arc<Self> {
            Arc::new(Self {
                granted: AtomicBool::new(false),
                prompts: AtomicUsize::new(0),
            })
        }
    }

    impl PermissionCheck for MockPermission {
        fn is_input_interception_permitted(&self) -> bool {
            self.granted.load(Ordering::SeqCst)
        }

        fn prompt_for_permission(&self) -> bool {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.granted.load(Ordering::SeqCst)
        }

        fn open_settings(&self) {}
    }

    #[derive(Default)]
    struct MockEffects {
        sounds: Mutex<Vec<String>>,
        notifications: Mutex<Vec<String>>,
    }

    impl Effects for MockEffects {
        fn notify(&self, title: &str, _body: &str) {
            self.notifications.lock().unwrap().push(title.to_string());
        }

        fn play_sound(&self, name: &str) {
            self.sounds.lock().unwrap().push(name.to_string());
        }
    }

    struct MockHotkeyBackend {
        registered: Mutex<Option<(KeyCombination, Arc<dyn Fn() + Send + Sync>)>>,
    }

    impl MockHotkeyBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                registered: Mutex::new(None),
            })
        }

        fn current_combination(&self) -> Option<KeyCombination> {
            self.registered.lock().unwrap().as_ref().map(|(c, _)| *c)
        }

        fn press(&self) {
            let callback = self
                .registered
                .lock()
                .unwrap()
                .as_ref()
                .map(|(_, cb)| Arc::clone(cb));
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    impl HotkeyBackend for MockHotkeyBackend {
        fn register(
            &self,
            combination: KeyCombination,
            callback: Arc<dyn Fn() + Send + Sync>,
        ) -> Result<(), HotkeyError> {
            *self.registered.lock().unwrap() = Some((combination, callback));
            Ok(())
        }

        fn unregister(&self) {
            *self.registered.lock().unwrap() = None;
        }
    }

    struct Harness {
        coordinator: CleanModeCoordinator,
        hook: Arc<MockHook>,
        overlays: Arc<MockOverlays>,
        permission: Arc<MockPermission>,
        effects: Arc<MockEffects>,
        hotkey: Arc<MockHotkeyBackend>,
        command_rx: mpsc::Receiver<Command>,
        event_rx: broadcast::Receiver<StateEvent>,
        prefs: Preferences,
    }

    fn harness_with(
        overlays: Arc<MockOverlays>,
        permission: Arc<MockPermission>,
    ) -> Harness {
        let hook = MockHook::new();
        let effects = Arc::new(MockEffects::default());
        let hotkey = MockHotkeyBackend::new();
        let prefs = Preferences::new(KeyCombination::new(KEY_CODE_L, Modifiers::command_shift()));
        let (event_tx, event_rx) = broadcast::channel(32);
        let (command_tx, command_rx) = mpsc::channel(8);

        let coordinator = CleanModeCoordinator::new(
            hook.clone(),
            hotkey.clone(),
            overlays.clone(),
            permission.clone(),
            effects.clone(),
            prefs.clone(),
            event_tx,
            command_tx,
        );

        Harness {
            coordinator,
            hook,
            overlays,
            permission,
            effects,
            hotkey,
            command_rx,
            event_rx,
            prefs,
        }
    }

    fn harness() -> Harness {
        harness_with(MockOverlays::new(2), MockPermission::granted())
    }

    #[test]
    fn test_initial_mode() {
        let h = harness();
        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
    }

    #[test]
    fn test_start_covers_every_display_and_pauses_hotkey() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        h.coordinator.handle_command(Command::Start);

        assert_eq!(h.coordinator.mode(), CleanMode::Active);
        assert!(h.hook.is_running());
        assert_eq!(h.overlays.open_count(), 2);
        assert!(h.hotkey.current_combination().is_none());

        match h.event_rx.try_recv().unwrap() {
            StateEvent::CleanModeStarted { overlay_count } => assert_eq!(overlay_count, 2),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(*h.effects.sounds.lock().unwrap(), vec![SOUND_START]);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut h = harness();
        h.coordinator.handle_command(Command::Start);
        h.coordinator.handle_command(Command::Start);

        assert_eq!(h.hook.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.overlays.open_count(), 2);
    }

    #[test]
    fn test_stop_releases_everything_and_rearms_hotkey() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        h.coordinator.handle_command(Command::Start);
        h.coordinator.handle_command(Command::Stop);

        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
        assert!(!h.hook.is_running());
        assert_eq!(h.overlays.open_count(), 0);
        assert!(h.hotkey.current_combination().is_some());

        let mut saw_stopped = false;
        while let Ok(event) = h.event_rx.try_recv() {
            if matches!(event, StateEvent::CleanModeStopped { .. }) {
                saw_stopped = true;
            }
        }
        assert!(saw_stopped);
        assert_eq!(
            *h.effects.sounds.lock().unwrap(),
            vec![SOUND_START, SOUND_STOP]
        );
    }

    #[test]
    fn test_stop_when_inactive_is_noop() {
        let mut h = harness();
        h.coordinator.handle_command(Command::Stop);
        assert_eq!(h.hook.stops.load(Ordering::SeqCst), 0);
        assert!(h.event_rx.try_recv().is_err());
    }

    #[test]
    fn test_toggle_flips_mode() {
        let mut h = harness();
        h.coordinator.handle_command(Command::Toggle);
        assert_eq!(h.coordinator.mode(), CleanMode::Active);
        h.coordinator.handle_command(Command::Toggle);
        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
    }

    #[test]
    fn test_permission_denied_blocks_start() {
        let mut h = harness_with(MockOverlays::new(1), MockPermission::denied());
        h.coordinator.handle_command(Command::Start);

        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
        assert_eq!(h.hook.starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.permission.prompts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            h.event_rx.try_recv().unwrap(),
            StateEvent::PermissionRequired
        ));
    }

    #[test]
    fn test_overlay_failure_rolls_back_hook_and_covers() {
        let mut h = harness_with(MockOverlays::failing_at(3, 1), MockPermission::granted());
        h.coordinator.handle_command(Command::Start);

        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
        assert!(!h.hook.is_running());
        assert_eq!(h.hook.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.overlays.open_count(), 0);
        assert!(h.event_rx.try_recv().is_err());
    }

    #[test]
    fn test_hook_failure_leaves_covers_closed() {
        let h = harness();
        h.hook.deny.store(true, Ordering::SeqCst);
        let mut coordinator = h.coordinator;
        coordinator.handle_command(Command::Start);

        assert_eq!(coordinator.mode(), CleanMode::Inactive);
        assert_eq!(h.overlays.open_count(), 0);
    }

    #[test]
    fn test_exit_signal_stops_active_mode() {
        let mut h = harness();
        h.coordinator.handle_command(Command::Start);
        h.coordinator.handle_exit_signal(ExitSignal::Combination);
        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
    }

    #[test]
    fn test_stale_exit_signal_ignored() {
        let mut h = harness();
        h.coordinator
            .handle_exit_signal(ExitSignal::FallbackSequence);
        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
        assert_eq!(h.hook.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hotkey_press_posts_toggle_command() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        h.hotkey.press();
        assert_eq!(h.command_rx.try_recv().unwrap(), Command::Toggle);
    }

    #[test]
    fn test_settings_open_pauses_hotkey_until_closed() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();

        h.coordinator.handle_command(Command::SettingsOpened);
        assert!(h.hotkey.current_combination().is_none());

        h.coordinator.handle_command(Command::SettingsClosed);
        assert!(h.hotkey.current_combination().is_some());
    }

    #[test]
    fn test_stop_with_settings_open_defers_rearm() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        h.coordinator.handle_command(Command::Start);
        h.coordinator.handle_command(Command::SettingsOpened);
        h.coordinator.handle_command(Command::Stop);
        assert!(h.hotkey.current_combination().is_none());

        h.coordinator.handle_command(Command::SettingsClosed);
        assert!(h.hotkey.current_combination().is_some());
    }

    #[test]
    fn test_combination_change_rebinds_hotkey() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();

        let new_combo = KeyCombination::new(15, Modifiers::command_shift());
        h.coordinator.handle_combination_changed(new_combo);

        assert_eq!(h.hotkey.current_combination(), Some(new_combo));
        assert!(matches!(
            h.event_rx.try_recv().unwrap(),
            StateEvent::HotkeyRebound { combination } if combination == new_combo
        ));
    }

    #[test]
    fn test_running_hook_keeps_combination_snapshot() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        let old_combo = h.prefs.exit_combination();
        h.coordinator.handle_command(Command::Start);

        let new_combo = KeyCombination::new(15, Modifiers::command_shift());
        h.coordinator.handle_combination_changed(new_combo);

        // The running hook is untouched and still holds the old snapshot
        assert_eq!(h.coordinator.mode(), CleanMode::Active);
        assert!(h.hook.is_running());
        assert_eq!(h.hook.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.hook.started_combination(), Some(old_combo));

        // The next session picks up the new combination
        h.coordinator.handle_command(Command::Stop);
        h.prefs.set_exit_combination(new_combo);
        h.coordinator.handle_command(Command::Start);
        assert_eq!(h.hook.started_combination(), Some(new_combo));
    }

    #[test]
    fn test_shutdown_stops_active_mode_and_unregisters() {
        let mut h = harness();
        h.coordinator.register_toggle_hotkey().unwrap();
        h.coordinator.handle_command(Command::Start);

        let keep_running = h.coordinator.handle_command(Command::Shutdown);
        assert!(!keep_running);
        assert_eq!(h.coordinator.mode(), CleanMode::Inactive);
        assert!(!h.hook.is_running());
        assert!(h.hotkey.current_combination().is_none());
    }

    #[tokio::test]
    async fn test_run_loop_processes_commands_and_prefs() {
        let h = harness();
        let (command_tx, command_rx) = mpsc::channel(8);
        let mut event_rx = h.event_rx;
        let prefs = h.prefs.clone();
        let mut coordinator = h.coordinator;
        coordinator.register_toggle_hotkey().unwrap();

        let task = tokio::spawn(async move { coordinator.run(command_rx).await });

        command_tx.send(Command::Start).await.unwrap();
        loop {
            match event_rx.recv().await.unwrap() {
                StateEvent::CleanModeStarted { overlay_count } => {
                    assert_eq!(overlay_count, 2);
                    break;
                }
                _ => continue,
            }
        }

        prefs.set_exit_combination(KeyCombination::new(15, Modifiers::command_shift()));
        loop {
            match event_rx.recv().await.unwrap() {
                StateEvent::HotkeyRebound { combination } => {
                    assert_eq!(combination.key_code, 15);
                    break;
                }
                _ => continue,
            }
        }

        command_tx.send(Command::Shutdown).await.unwrap();
        task.await.unwrap();
    }
}
