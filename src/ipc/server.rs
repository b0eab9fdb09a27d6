//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! state change events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::keys::KeyCombination;
use crate::prefs::Preferences;
use crate::state::{CleanMode, Command};

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    command_tx: mpsc::Sender<Command>,
    prefs: Preferences,
    event_tx: broadcast::Sender<StateEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    mode: CleanMode,
    start_time: std::time::Instant,
}

impl Server {
    /// Create a new IPC server bound to the given socket path
    pub fn new(
        socket_path: &Path,
        command_tx: mpsc::Sender<Command>,
        prefs: Preferences,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            mode: CleanMode::Inactive,
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            command_tx,
            prefs,
            event_tx,
            shutdown_tx,
        })
    }

    /// Update the mode reported in status responses
    pub async fn set_mode(&self, mode: CleanMode) {
        let mut state = self.state.write().await;
        if state.mode != mode {
            info!(from = %state.mode, to = %mode, "IPC server: mode updated");
            state.mode = mode;
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let command_tx = self.command_tx.clone();
                    let prefs = self.prefs.clone();
                    let event_tx = self.event_tx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, command_tx, prefs, event_tx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// The write half is owned by a dedicated task so request responses and
    /// subscription pushes cannot interleave mid-frame.
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        command_tx: mpsc::Sender<Command>,
        prefs: Preferences,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(32);
        let writer_task = tokio::spawn(Self::write_loop(writer, out_rx));
        let mut forward_task: Option<tokio::task::JoinHandle<()>> = None;

        let result =
            Self::read_loop(&mut reader, &state, &command_tx, &prefs, &event_tx, &out_tx, &mut forward_task)
                .await;

        drop(out_tx);
        if let Some(task) = forward_task {
            task.abort();
        }
        let _ = writer_task.await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_loop(
        reader: &mut OwnedReadHalf,
        state: &Arc<RwLock<ServerState>>,
        command_tx: &mpsc::Sender<Command>,
        prefs: &Preferences,
        event_tx: &broadcast::Sender<StateEvent>,
        out_tx: &mpsc::Sender<Vec<u8>>,
        forward_task: &mut Option<tokio::task::JoinHandle<()>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    if matches!(request, Request::Subscribe) && forward_task.is_none() {
                        *forward_task = Some(tokio::spawn(Self::forward_events(
                            event_tx.subscribe(),
                            out_tx.clone(),
                        )));
                        debug!("client subscribed to notifications");
                    }
                    Self::process_request(request, state, command_tx, prefs).await
                }
                Err(e) => Response::Error {
                    code: "bad_request".to_string(),
                    message: e.to_string(),
                },
            };

            let frame = encode_message(&response)?;
            if out_tx.send(frame).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Drain the outgoing channel into the socket
    async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!(?e, "client write failed");
                return;
            }
        }
    }

    /// Push state events to a subscribed client
    async fn forward_events(
        mut event_rx: broadcast::Receiver<StateEvent>,
        out_tx: mpsc::Sender<Vec<u8>>,
    ) {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let note = Notification::StateEvent(event);
                    let frame = match encode_message(&note) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(?e, "failed to encode notification");
                            continue;
                        }
                    };
                    if out_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Process a request and build its response
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        command_tx: &mpsc::Sender<Command>,
        prefs: &Preferences,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let state = state.read().await;
                Response::Status(DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    mode: state.mode,
                    exit_combination: prefs.exit_combination(),
                    uptime_secs: state.start_time.elapsed().as_secs(),
                })
            }

            Request::Toggle => Self::post_command(command_tx, Command::Toggle).await,
            Request::StartCleanMode => Self::post_command(command_tx, Command::Start).await,
            Request::StopCleanMode => Self::post_command(command_tx, Command::Stop).await,
            Request::SettingsOpened => {
                Self::post_command(command_tx, Command::SettingsOpened).await
            }
            Request::SettingsClosed => {
                Self::post_command(command_tx, Command::SettingsClosed).await
            }

            Request::SetExitCombination {
                key_code,
                modifiers,
            } => {
                let combination = KeyCombination::new(key_code, modifiers);
                if combination.modifiers.is_empty() {
                    return Response::Error {
                        code: "invalid_combination".to_string(),
                        message: "exit combination requires at least one modifier".to_string(),
                    };
                }
                prefs.set_exit_combination(combination);
                Response::Ack
            }

            Request::SetNotificationsEnabled { enabled } => {
                prefs.set_notifications_enabled(enabled);
                Response::Ack
            }

            Request::SetSoundEnabled { enabled } => {
                prefs.set_sound_enabled(enabled);
                Response::Ack
            }

            Request::Subscribe => Response::Subscribed,
        }
    }

    async fn post_command(command_tx: &mpsc::Sender<Command>, command: Command) -> Response {
        match command_tx.send(command).await {
            Ok(()) => Response::Ack,
            Err(_) => Response::Error {
                code: "daemon_stopping".to_string(),
                message: "coordinator is no longer accepting commands".to_string(),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Encode a length-prefixed JSON frame
fn encode_message<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}
