//! Connection supervisor: owns the device handle, runs the read loop, and
//! reconnects automatically after an unexpected loss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::CircularBuffer;
use crate::device::{DeviceOpener, LinePayload, SerialDevice};
use crate::notify::{ConnectionEvent, ConnectionNotifier};
use crate::session::SessionLogWriter;
use crate::watch::WatchScheduler;

use super::error::{ConnectionError, SendError};
use super::state::{PortState, StateCell};

/// Fixed delay between reconnect attempts after an unexpected loss.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// The open device handle, shared between the read loop and `send`.
///
/// `None` while the connection is lost and the reconnect loop is probing.
type DeviceSlot = Arc<Mutex<Option<Box<dyn SerialDevice>>>>;

/// Collaborators a connection fans received data out to.
pub struct ConnectionParts {
    pub opener: Arc<dyn DeviceOpener>,
    pub notifier: Arc<dyn ConnectionNotifier>,
    pub buffer: Arc<CircularBuffer>,
    pub log: Arc<SessionLogWriter>,
    pub watches: Arc<WatchScheduler>,
    pub reconnect_delay: Duration,
}

/// Single sink for everything a connection receives or announces.
///
/// Data lines and lifecycle markers both flow through here, which keeps the
/// buffer, watch tasks, and session log seeing an identical stream.
#[derive(Clone)]
struct FanOut {
    port: String,
    buffer: Arc<CircularBuffer>,
    watches: Arc<WatchScheduler>,
    log: Arc<SessionLogWriter>,
    notifier: Arc<dyn ConnectionNotifier>,
}

impl FanOut {
    fn data(&self, payload: LinePayload) {
        let (timestamp, text) = payload.normalize(Utc::now());
        self.buffer.add(timestamp, text.clone());
        self.watches.deliver(&self.port, &text);
        self.log.log_data(timestamp, &text);
    }

    fn event(&self, event: ConnectionEvent) {
        let timestamp = Utc::now();
        let marker = event.marker();
        self.buffer.add_marker(timestamp, marker);
        self.watches.deliver(&self.port, marker);
        self.log.log_data(timestamp, marker);
        self.notifier.connection_event(&self.port, event);
    }
}

/// One supervised port connection.
///
/// Created by [`Connection::open`]; lives until [`Connection::shutdown`].
/// An unexpected device loss does not end the connection: the read loop
/// keeps probing and reopens the port when it comes back.
pub struct Connection {
    port: String,
    baud: u32,
    state: StateCell,
    slot: DeviceSlot,
    fanout: FanOut,
    cancel: CancellationToken,
    user_disconnect: AtomicBool,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open the port and start its supervised read loop.
    ///
    /// The session log is best-effort: a logging failure is reported and
    /// the connection proceeds without it.
    ///
    /// # Errors
    ///
    /// Fails only if the device itself cannot be opened.
    pub async fn open(
        port: &str,
        baud: u32,
        parts: ConnectionParts,
    ) -> Result<Arc<Self>, ConnectionError> {
        let state = StateCell::new(port);
        state.transition(PortState::Connecting);

        let device = match parts.opener.open(port, baud).await {
            Ok(device) => device,
            Err(source) => {
                state.transition(PortState::Disconnected);
                return Err(ConnectionError::OpenFailed {
                    port: port.to_string(),
                    source,
                });
            }
        };

        if let Err(err) = parts.log.start_session(port, baud).await {
            tracing::warn!(port, error = %err, "Session logging unavailable for this connection");
        }

        let fanout = FanOut {
            port: port.to_string(),
            buffer: parts.buffer,
            watches: parts.watches,
            log: parts.log,
            notifier: parts.notifier,
        };

        let connection = Arc::new(Self {
            port: port.to_string(),
            baud,
            state,
            slot: Arc::new(Mutex::new(Some(device))),
            fanout,
            cancel: CancellationToken::new(),
            user_disconnect: AtomicBool::new(false),
            read_task: StdMutex::new(None),
        });

        connection.state.transition(PortState::Connected);
        connection.fanout.event(ConnectionEvent::Established);
        tracing::info!(port, baud, "Connected");

        let loop_conn = Arc::clone(&connection);
        let opener = parts.opener;
        let delay = parts.reconnect_delay;
        let handle = tokio::spawn(async move {
            ReadLoop {
                conn: loop_conn,
                opener,
                delay,
            }
            .run()
            .await;
        });
        *lock_std(&connection.read_task) = Some(handle);

        Ok(connection)
    }

    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    #[must_use]
    pub fn baud(&self) -> u32 {
        self.baud
    }

    #[must_use]
    pub fn state(&self) -> PortState {
        self.state.get()
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.fanout.buffer
    }

    #[must_use]
    pub fn log(&self) -> &Arc<SessionLogWriter> {
        &self.fanout.log
    }

    /// Write raw bytes to the device.
    ///
    /// # Errors
    ///
    /// Fails if the port is not currently connected or the write fails.
    pub async fn send(&self, data: &[u8]) -> Result<(), SendError> {
        if self.state.get() != PortState::Connected {
            return Err(SendError::NotConnected(self.port.clone()));
        }
        let mut slot = self.slot.lock().await;
        let Some(device) = slot.as_mut() else {
            return Err(SendError::NotConnected(self.port.clone()));
        };
        device
            .write(data)
            .await
            .map_err(|source| SendError::WriteFailed {
                port: self.port.clone(),
                source,
            })
    }

    /// Stop the read loop, emit the user-disconnect marker, and close the
    /// session log. Idempotent.
    pub async fn shutdown(&self) {
        if self.user_disconnect.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handle = lock_std(&self.read_task).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(port = self.port, error = %err, "Read loop ended abnormally");
            }
        }

        self.fanout.event(ConnectionEvent::UserDisconnected);
        if let Err(err) = self.fanout.log.end_session().await {
            tracing::warn!(port = self.port, error = %err, "Failed to finalize session log");
        }
        self.slot.lock().await.take();
        self.state.transition(PortState::Disconnected);
        tracing::info!(port = self.port, "Disconnected by user");
    }
}

/// Drives one connection: reads lines, fans them out, and reconnects.
struct ReadLoop {
    conn: Arc<Connection>,
    opener: Arc<dyn DeviceOpener>,
    delay: Duration,
}

impl ReadLoop {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                () = self.conn.cancel.cancelled() => break,
                next = self.read_next() => next,
            };
            match next {
                Ok(Some(raw)) => self.conn.fanout.data(LinePayload::parse(&raw)),
                Ok(None) => {}
                Err(err) => {
                    if self.conn.user_disconnect.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::warn!(port = self.conn.port, error = %err, "Connection lost");
                    self.conn.slot.lock().await.take();
                    self.conn.state.transition(PortState::Lost);
                    self.conn.fanout.event(ConnectionEvent::Lost);

                    self.conn.state.transition(PortState::Reconnecting);
                    if !self.reconnect().await {
                        break;
                    }
                    self.conn.state.transition(PortState::Connected);
                    self.conn.fanout.event(ConnectionEvent::Restored);
                    tracing::info!(port = self.conn.port, "Connection restored");
                }
            }
        }
    }

    /// Poll the device for one line, holding the slot only for the poll.
    async fn read_next(&self) -> Result<Option<String>, crate::device::DeviceError> {
        let mut slot = self.conn.slot.lock().await;
        match slot.as_mut() {
            Some(device) => device.read_line().await,
            None => {
                drop(slot);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(None)
            }
        }
    }

    /// Retry opening the port every `delay` until it succeeds or the
    /// connection is shut down. Enumeration gates each attempt so a port
    /// that is still absent is not opened blindly.
    async fn reconnect(&self) -> bool {
        let port = &self.conn.port;
        let mut attempt: u64 = 0;
        loop {
            tokio::select! {
                () = self.conn.cancel.cancelled() => return false,
                () = tokio::time::sleep(self.delay) => {}
            }
            attempt += 1;

            if let Ok(ports) = self.opener.enumerate().await {
                if !ports.iter().any(|info| info.path == *port) {
                    tracing::debug!(port, attempt, "Port not yet present, waiting");
                    continue;
                }
            }

            match self.opener.open(port, self.conn.baud).await {
                Ok(device) => {
                    *self.conn.slot.lock().await = Some(device);
                    tracing::info!(port, attempt, "Reopened port");
                    return true;
                }
                Err(err) => {
                    tracing::debug!(port, attempt, error = %err, "Reconnect attempt failed");
                }
            }
        }
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
