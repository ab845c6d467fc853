//! Unix socket server that connects bridge clients to the pipeline.
//!
//! Every connected client receives every outbound event as one line and may
//! send command lines at any time.

use crate::bridge::protocol::{BridgeCommand, BridgeEvent};
use crate::error::{Result, VoxError};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

/// Capacity of the per-client event backlog.
const CLIENT_BACKLOG: usize = 256;

/// Handles commands arriving from bridge clients.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: BridgeCommand);
}

/// Socket path used when the config names none.
pub fn default_socket_path() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join("voxloop.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/voxloop-{uid}.sock"))
    }
}

#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<AtomicBool>,
    /// Set once `ready` went out, so late clients still learn it. Held while
    /// publishing and while subscribing, so each client sees `ready` once.
    ready: Arc<Mutex<bool>>,
}

fn lock(ready: &Mutex<bool>) -> MutexGuard<'_, bool> {
    ready.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BridgeServer {
    socket_path: PathBuf,
    events: broadcast::Sender<BridgeEvent>,
    state: ServerState,
}

impl BridgeServer {
    pub fn new(socket_path: PathBuf) -> Self {
        let (events, _) = broadcast::channel(CLIENT_BACKLOG);
        Self {
            socket_path,
            events,
            state: ServerState {
                shutdown: Arc::new(AtomicBool::new(false)),
                ready: Arc::new(Mutex::new(false)),
            },
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Drains the pipeline's notification queue into the server.
    ///
    /// Runs on a plain thread so the blocking receive never ties up the
    /// runtime. Ends once every `Notifier` is gone.
    pub fn forward(&self, notifications: Receiver<BridgeEvent>) -> std::io::Result<JoinHandle<()>> {
        let events = self.events.clone();
        let ready = Arc::clone(&self.state.ready);
        thread::Builder::new()
            .name("bridge-forward".to_string())
            .spawn(move || {
                for event in notifications {
                    let mut sent_ready = lock(&ready);
                    let is_ready = event == BridgeEvent::Ready;
                    // No connected client is fine.
                    events.send(event).ok();
                    if is_ready {
                        *sent_ready = true;
                    }
                }
                tracing::debug!("notification queue closed");
            })
    }

    /// A receiver for future events, and whether `ready` was already sent.
    fn subscribe(&self) -> (broadcast::Receiver<BridgeEvent>, bool) {
        let ready = lock(&self.state.ready);
        (self.events.subscribe(), *ready)
    }

    /// Accepts clients until [`stop`](Self::stop) is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| VoxError::BridgeSocket {
                message: format!("failed to remove stale socket: {e}"),
            })?;
        }
        let listener = UnixListener::bind(&self.socket_path).map_err(|e| VoxError::BridgeSocket {
            message: format!("failed to bind {}: {e}", self.socket_path.display()),
        })?;
        tracing::info!(socket = %self.socket_path.display(), "bridge listening");

        let handler = Arc::new(handler);
        while !self.state.shutdown.load(Ordering::SeqCst) {
            let accepted =
                tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept())
                    .await;
            match accepted {
                Ok(Ok((stream, _))) => {
                    tracing::info!("bridge client connected");
                    let handler = Arc::clone(&handler);
                    let (events, ready) = self.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, events, ready, handler).await {
                            tracing::warn!("bridge client error: {e}");
                        }
                        tracing::info!("bridge client disconnected");
                    });
                }
                Ok(Err(e)) => {
                    return Err(VoxError::BridgeConnection {
                        message: format!("failed to accept connection: {e}"),
                    });
                }
                Err(_) => continue,
            }
        }
        Ok(())
    }

    /// Stops accepting clients and removes the socket file.
    pub fn stop(&self) -> Result<()> {
        self.state.shutdown.store(true, Ordering::SeqCst);
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| VoxError::BridgeSocket {
                message: format!("failed to remove socket file: {e}"),
            })?;
        }
        Ok(())
    }
}

async fn serve_client<H>(
    stream: UnixStream,
    mut events: broadcast::Receiver<BridgeEvent>,
    ready: bool,
    handler: Arc<H>,
) -> Result<()>
where
    H: CommandHandler + ?Sized,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if ready {
        write_event(&mut writer, BridgeEvent::Ready).await?;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| VoxError::BridgeConnection {
                    message: format!("failed to read from client: {e}"),
                })?;
                let Some(line) = line else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<BridgeCommand>() {
                    Ok(command) => {
                        tracing::debug!(%command, "bridge command");
                        handler.handle(command).await;
                    }
                    Err(e) => tracing::warn!(line = %line, "ignoring bridge line: {e}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => write_event(&mut writer, event).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "bridge client too slow, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn write_event<W>(writer: &mut W, event: BridgeEvent) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let line = format!("{event}\n");
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| VoxError::BridgeConnection {
            message: format!("failed to write to client: {e}"),
        })?;
    writer.flush().await.map_err(|e| VoxError::BridgeConnection {
        message: format!("failed to flush client: {e}"),
    })
}
