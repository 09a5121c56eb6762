//! Top-level registry tying ports, buffers, watches, and session logs
//! together behind one API surface.

mod responses;

pub use responses::{BufferResponse, ConnectInfo, PortStatus, ReadResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::buffer::CircularBuffer;
use crate::config::MonitorConfig;
use crate::connection::{Connection, ConnectionError, ConnectionParts, PortState, SendError};
use crate::device::{DeviceError, DeviceOpener, PortInfo};
use crate::notify::{ConnectionNotifier, NoopNotifier};
use crate::session::SessionLogWriter;
use crate::watch::{WatchConfig, WatchError, WatchScheduler, WatchSnapshot, WatchTask};

/// Owns every port connection and the shared watch scheduler.
///
/// Entries for disconnected ports are retained so their buffered history
/// stays readable; reconnecting a port starts fresh.
pub struct PortRegistry {
    opener: Arc<dyn DeviceOpener>,
    notifier: Arc<dyn ConnectionNotifier>,
    config: MonitorConfig,
    watches: Arc<WatchScheduler>,
    ports: Mutex<HashMap<String, Arc<Connection>>>,
}

impl PortRegistry {
    #[must_use]
    pub fn new(opener: Arc<dyn DeviceOpener>, config: MonitorConfig) -> Self {
        Self::with_notifier(opener, Arc::new(NoopNotifier), config)
    }

    #[must_use]
    pub fn with_notifier(
        opener: Arc<dyn DeviceOpener>,
        notifier: Arc<dyn ConnectionNotifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            opener,
            notifier,
            config,
            watches: Arc::new(WatchScheduler::new()),
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerate available serial ports.
    ///
    /// # Errors
    ///
    /// Propagates enumeration failures from the device layer.
    pub async fn list_ports(&self) -> Result<Vec<PortInfo>, DeviceError> {
        self.opener.enumerate().await
    }

    /// Connect to `port`, replacing any retained disconnected entry.
    ///
    /// # Errors
    ///
    /// Fails if the port is already connected (in any live state) or the
    /// device cannot be opened.
    pub async fn connect(
        &self,
        port: &str,
        baud: Option<u32>,
    ) -> Result<ConnectInfo, ConnectionError> {
        let baud = baud.unwrap_or(self.config.default_baud);
        let mut ports = self.ports.lock().await;
        if let Some(existing) = ports.get(port) {
            if existing.state() != PortState::Disconnected {
                return Err(ConnectionError::AlreadyConnected(port.to_string()));
            }
        }

        let parts = ConnectionParts {
            opener: Arc::clone(&self.opener),
            notifier: Arc::clone(&self.notifier),
            buffer: Arc::new(CircularBuffer::new(self.config.buffer_seconds)),
            log: SessionLogWriter::new(self.config.session.clone()),
            watches: Arc::clone(&self.watches),
            reconnect_delay: Duration::from_secs(self.config.reconnect_delay_secs),
        };
        let connection = Connection::open(port, baud, parts).await?;
        let log_file = connection.log().current_path().await;
        ports.insert(port.to_string(), connection);

        Ok(ConnectInfo {
            port: port.to_string(),
            baud,
            log_file,
        })
    }

    /// Disconnect `port`. Running watches on the port move to an error
    /// state; its buffered history remains readable.
    ///
    /// # Errors
    ///
    /// Fails if the port is not currently connected.
    pub async fn disconnect(&self, port: &str) -> Result<(), ConnectionError> {
        let connection = {
            let ports = self.ports.lock().await;
            match ports.get(port) {
                Some(conn) if conn.state() != PortState::Disconnected => Arc::clone(conn),
                _ => return Err(ConnectionError::NotConnected(port.to_string())),
            }
        };
        connection.shutdown().await;
        self.watches.fail_port(port);
        Ok(())
    }

    /// Write raw bytes to a connected port.
    ///
    /// # Errors
    ///
    /// Fails if the port is unknown, not connected, or the write fails.
    pub async fn send(&self, port: &str, data: &[u8]) -> Result<(), SendError> {
        let connection = self
            .lookup(port)
            .await
            .ok_or_else(|| SendError::NotConnected(port.to_string()))?;
        connection.send(data).await
    }

    /// Whether `port` currently has a live connection.
    pub async fn is_connected(&self, port: &str) -> bool {
        match self.lookup(port).await {
            Some(conn) => conn.state() == PortState::Connected,
            None => false,
        }
    }

    /// Wait for `duration`, then return everything buffered on `port`,
    /// noting how many lines arrived during the wait.
    ///
    /// # Errors
    ///
    /// Fails if the port is not currently connected.
    pub async fn read(&self, port: &str, duration: Duration) -> Result<ReadResponse, ConnectionError> {
        let connection = match self.lookup(port).await {
            Some(conn) if conn.state() != PortState::Disconnected => conn,
            _ => return Err(ConnectionError::NotConnected(port.to_string())),
        };

        let before = connection.buffer().len();
        tokio::time::sleep(duration).await;

        let data = connection.buffer().get_all();
        let total_lines = data.len();
        Ok(ReadResponse {
            port: port.to_string(),
            duration_seconds: duration.as_secs_f64(),
            total_lines,
            lines_during_read: total_lines.saturating_sub(before),
            buffer_seconds: connection.buffer().window_seconds(),
            data,
        })
    }

    /// Fetch buffered history for `port`, optionally limited to the most
    /// recent `seconds`. Works on disconnected ports that still hold data.
    ///
    /// # Errors
    ///
    /// Fails if the port was never connected.
    pub async fn get_buffer(
        &self,
        port: &str,
        seconds: Option<u64>,
    ) -> Result<BufferResponse, ConnectionError> {
        let connection = self
            .lookup(port)
            .await
            .ok_or_else(|| ConnectionError::PortNotFound(port.to_string()))?;

        let data = match seconds {
            Some(seconds) => connection.buffer().get_recent(seconds),
            None => connection.buffer().get_all(),
        };
        Ok(BufferResponse {
            port: port.to_string(),
            buffer_seconds: seconds.unwrap_or_else(|| connection.buffer().window_seconds()),
            total_lines: data.len(),
            data,
        })
    }

    /// State of every known port, or just the one named.
    pub async fn status(&self, port: Option<&str>) -> Vec<PortStatus> {
        let ports = self.ports.lock().await;
        let mut statuses: Vec<PortStatus> = ports
            .iter()
            .filter(|(name, _)| port.is_none_or(|p| p == name.as_str()))
            .map(|(name, conn)| PortStatus {
                port: name.clone(),
                state: conn.state(),
                connected: conn.state() == PortState::Connected,
            })
            .collect();
        statuses.sort_by(|a, b| a.port.cmp(&b.port));
        statuses
    }

    /// Start a background pattern watch, connecting the port first if it
    /// is not already connected.
    ///
    /// # Errors
    ///
    /// Fails on an invalid pattern, or if the port had to be connected and
    /// the connect failed. Nothing is registered on failure.
    pub async fn start_watch(&self, config: WatchConfig) -> Result<Uuid, WatchError> {
        let task = WatchTask::new(&config)?;

        if !self.is_connected(&config.port).await {
            match self.connect(&config.port, None).await {
                // A lost port that is mid-reconnect counts as connected
                // enough: the watch will see lines once it recovers.
                Ok(_) | Err(ConnectionError::AlreadyConnected(_)) => {}
                Err(err) => return Err(WatchError::Connection(err)),
            }
        }

        Ok(self.watches.register(task))
    }

    /// Snapshot a watch task's state and captured output.
    ///
    /// # Errors
    ///
    /// Fails if the id is unknown or already swept from retention.
    pub fn check_watch(&self, id: Uuid) -> Result<WatchSnapshot, WatchError> {
        self.watches.check_status(id)
    }

    /// Cancel a running watch. Returns false if it already finished or is
    /// unknown.
    pub fn cancel_watch(&self, id: Uuid) -> bool {
        self.watches.cancel(id)
    }

    /// Disconnect every live port. Used at host shutdown.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<Connection>> = {
            let ports = self.ports.lock().await;
            ports.values().cloned().collect()
        };
        for connection in connections {
            if connection.state() != PortState::Disconnected {
                connection.shutdown().await;
                self.watches.fail_port(connection.port());
            }
        }
    }

    async fn lookup(&self, port: &str) -> Option<Arc<Connection>> {
        self.ports.lock().await.get(port).cloned()
    }
}
