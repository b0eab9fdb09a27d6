//! screen-cleaner-daemon: Background daemon for keyboard-safe screen cleaning
//!
//! This daemon runs as a LaunchAgent and provides:
//! - A clean mode that suppresses all keyboard and media-key input
//! - Full-screen cover overlays driven through the menu bar app
//! - A global toggle hotkey and two keyboard exit paths (the configured
//!   combination, or nine consecutive Escape presses)
//! - IPC server for menu bar app communication

mod config;
mod effects;
mod events;
mod hotkey;
mod interceptor;
mod ipc;
mod keys;
mod lifecycle;
mod overlay;
mod permission;
mod prefs;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::effects::create_effects;
use crate::events::StateEvent;
use crate::hotkey::create_hotkey_backend;
use crate::interceptor::create_input_hook;
use crate::ipc::Server;
use crate::overlay::IpcOverlays;
use crate::permission::create_permission_check;
use crate::prefs::Preferences;
use crate::state::{CleanMode, CleanModeCoordinator, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "screen-cleaner-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");

    let prefs = Preferences::new(config.default_exit_combination);
    prefs.set_notifications_enabled(config.notifications_enabled);
    prefs.set_sound_enabled(config.sound_enabled);

    // Create channels for inter-component communication
    // IPC server and hotkey -> coordinator
    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    // Coordinator -> IPC server (for broadcasting state events)
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    // Create the coordinator with its platform ports
    let mut coordinator = CleanModeCoordinator::new(
        create_input_hook(),
        create_hotkey_backend(),
        Arc::new(IpcOverlays::new(event_tx.clone())),
        create_permission_check(),
        create_effects(),
        prefs.clone(),
        event_tx.clone(),
        command_tx.clone(),
    );

    // Register the global toggle hotkey
    match coordinator.register_toggle_hotkey() {
        Ok(()) => {
            info!("toggle hotkey registered");
        }
        Err(e) => {
            error!(?e, "failed to register toggle hotkey");
            warn!("continuing without hotkey support - check Accessibility permissions");
        }
    }

    // Create IPC server
    let server = Arc::new(Server::new(
        &config.socket_path,
        command_tx.clone(),
        prefs,
        event_tx.clone(),
    )?);

    // Run the coordinator on its own task so shutdown can post a final
    // command and wait for its cleanup to finish
    let coordinator_task = tokio::spawn(coordinator.run(command_rx));

    // Keep the IPC server's status view in sync with the coordinator
    let mut mode_event_rx = event_tx.subscribe();
    let server_for_events = Arc::clone(&server);

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror mode transitions into the IPC status snapshot
        _ = async {
            loop {
                match mode_event_rx.recv().await {
                    Ok(event) => {
                        let mode = match &event {
                            StateEvent::CleanModeStarted { .. } => CleanMode::Active,
                            StateEvent::CleanModeStopped { .. } => CleanMode::Inactive,
                            _ => continue,
                        };
                        server_for_events.set_mode(mode).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        result = lifecycle::wait_for_shutdown() => {
            if let Err(e) = result {
                error!(?e, "signal handler error");
            }
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if command_tx.send(Command::Shutdown).await.is_err() {
        warn!("coordinator already stopped");
    }
    if let Err(e) = coordinator_task.await {
        error!(?e, "coordinator task failed");
    }
    server.shutdown().await;

    info!("screen-cleaner-daemon stopped");

    Ok(())
}
