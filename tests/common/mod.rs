//! Scripted serial-device mocks shared by the integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serial_supervisor::config::{MonitorConfig, SessionConfig};
use serial_supervisor::device::{DeviceError, DeviceOpener, PortInfo, SerialDevice};
use tokio::sync::mpsc;

type LineResult = Result<String, DeviceError>;

/// Handle for driving one scripted device from a test.
///
/// Dropping the handle closes the line channel, which the device under
/// supervision observes as a connection loss.
pub struct DeviceScript {
    tx: mpsc::UnboundedSender<LineResult>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl DeviceScript {
    /// Emit one line from the device.
    pub fn send_line(&self, text: &str) {
        let _ = self.tx.send(Ok(text.to_string()));
    }

    /// Make the next read fail, simulating an unexpected loss.
    pub fn fail(&self, err: DeviceError) {
        let _ = self.tx.send(Err(err));
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

/// A device that replays a scripted stream of lines and errors.
struct MockDevice {
    rx: mpsc::UnboundedReceiver<LineResult>,
    written: Arc<Mutex<Vec<u8>>>,
    port: String,
}

#[async_trait]
impl SerialDevice for MockDevice {
    async fn read_line(&mut self) -> Result<Option<String>, DeviceError> {
        match tokio::time::timeout(Duration::from_millis(25), self.rx.recv()).await {
            Ok(Some(Ok(line))) => Ok(Some(line)),
            Ok(Some(Err(err))) => Err(err),
            Ok(None) => Err(DeviceError::Disconnected(self.port.clone())),
            Err(_) => Ok(None),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

enum Queued {
    Device(MockDevice),
    Fail(DeviceError),
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Queued>>,
    present: HashSet<String>,
}

/// Opener backed by per-port queues of scripted outcomes.
///
/// Each `connect` (or reconnect attempt) pops the next queued outcome for
/// that port; an empty queue reports the port as missing.
#[derive(Default)]
pub struct MockOpener {
    inner: Mutex<Inner>,
}

impl MockOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `port` visible to enumeration without queueing a device.
    pub fn add_port(&self, port: &str) {
        self.inner.lock().unwrap().present.insert(port.to_string());
    }

    /// Remove `port` from enumeration results.
    pub fn remove_port(&self, port: &str) {
        self.inner.lock().unwrap().present.remove(port);
    }

    /// Queue a device for `port` and return the script handle driving it.
    pub fn push_device(&self, port: &str) -> DeviceScript {
        let (tx, rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let device = MockDevice {
            rx,
            written: Arc::clone(&written),
            port: port.to_string(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.present.insert(port.to_string());
        inner
            .queues
            .entry(port.to_string())
            .or_default()
            .push_back(Queued::Device(device));
        DeviceScript { tx, written }
    }

    /// Queue an open failure for `port`.
    pub fn push_failure(&self, port: &str, err: DeviceError) {
        let mut inner = self.inner.lock().unwrap();
        inner.present.insert(port.to_string());
        inner
            .queues
            .entry(port.to_string())
            .or_default()
            .push_back(Queued::Fail(err));
    }
}

#[async_trait]
impl DeviceOpener for MockOpener {
    async fn open(&self, port: &str, _baud: u32) -> Result<Box<dyn SerialDevice>, DeviceError> {
        let queued = self
            .inner
            .lock()
            .unwrap()
            .queues
            .get_mut(port)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Queued::Device(device)) => Ok(Box::new(device)),
            Some(Queued::Fail(err)) => Err(err),
            None => Err(DeviceError::NotFound(port.to_string())),
        }
    }

    async fn enumerate(&self) -> Result<Vec<PortInfo>, DeviceError> {
        let inner = self.inner.lock().unwrap();
        let mut ports: Vec<PortInfo> = inner
            .present
            .iter()
            .map(|path| PortInfo {
                path: path.clone(),
                description: "mock device".to_string(),
                manufacturer: String::new(),
                serial_number: String::new(),
            })
            .collect();
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ports)
    }
}

/// Config with session logging disabled, for tests that only exercise the
/// in-memory paths.
pub fn quiet_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.session.enabled = false;
    config
}

/// Config that writes session logs under `dir` and flushes only on demand.
pub fn logging_config(dir: &std::path::Path) -> MonitorConfig {
    MonitorConfig {
        session: SessionConfig {
            enabled: true,
            flush_interval_seconds: 0,
            directory: dir.to_path_buf(),
            ..SessionConfig::default()
        },
        ..MonitorConfig::default()
    }
}
