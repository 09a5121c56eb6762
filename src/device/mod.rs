//! External device collaborators.
//!
//! The core consumes, but does not implement, a line-oriented device I/O
//! primitive and a device-enumeration primitive. Embedders supply both
//! through the traits here; tests supply scripted mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors produced by a device collaborator.
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    /// The named device does not exist or is not enumerable.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The device exists but could not be opened.
    #[error("Device busy or unavailable: {0}")]
    Busy(String),

    /// A live device handle stopped responding (unplug, driver reset).
    #[error("Device connection lost: {0}")]
    Disconnected(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Description of one enumerable serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM9`.
    pub path: String,
    /// Human-readable device description.
    #[serde(default)]
    pub description: String,
    /// Manufacturer string, if reported.
    #[serde(default)]
    pub manufacturer: String,
    /// Hardware serial number, if reported.
    #[serde(default)]
    pub serial_number: String,
}

/// An open line-oriented device handle.
///
/// Implementations must return `Ok(None)` after a short internal poll
/// timeout instead of blocking indefinitely; the owning read loop releases
/// the device between calls so that writes can interleave.
#[async_trait]
pub trait SerialDevice: Send {
    /// Read the next complete line, or `Ok(None)` on a quiet poll tick.
    ///
    /// # Errors
    ///
    /// Returns an error when the device handle is no longer usable; the
    /// supervisor treats any error as an unexpected connection loss.
    async fn read_line(&mut self) -> Result<Option<String>, DeviceError>;

    /// Write raw bytes to the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the handle is unusable.
    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;
}

/// Factory and enumerator for serial devices.
#[async_trait]
pub trait DeviceOpener: Send + Sync {
    /// Open the named port at the given baud rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the port does not exist or cannot be opened.
    async fn open(&self, port: &str, baud: u32) -> Result<Box<dyn SerialDevice>, DeviceError>;

    /// Enumerate currently available ports.
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration itself fails.
    async fn enumerate(&self) -> Result<Vec<PortInfo>, DeviceError>;
}

/// Wire shape for devices that emit structured JSON lines.
#[derive(Debug, Deserialize)]
struct StructuredLine {
    timestamp: DateTime<Utc>,
    #[serde(alias = "data")]
    text: String,
}

/// A received line, either structured (device-supplied timestamp) or raw.
///
/// Both variants normalize to a single timestamped shape before reaching
/// the buffer, watch tasks, or the log writer.
#[derive(Debug, Clone, PartialEq)]
pub enum LinePayload {
    /// The device supplied its own timestamp alongside the text.
    Structured {
        /// Device-supplied timestamp.
        timestamp: DateTime<Utc>,
        /// Line text.
        text: String,
    },
    /// Plain text; the receive time is used as the timestamp.
    Raw {
        /// Line text.
        text: String,
    },
}

impl LinePayload {
    /// Attempt a structured decode, falling back to raw text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<StructuredLine>(raw) {
            Ok(line) => Self::Structured {
                timestamp: line.timestamp,
                text: line.text,
            },
            Err(_) => Self::Raw {
                text: raw.to_string(),
            },
        }
    }

    /// Resolve to a `(timestamp, text)` pair, using `received_at` for raw lines.
    #[must_use]
    pub fn normalize(self, received_at: DateTime<Utc>) -> (DateTime<Utc>, String) {
        match self {
            Self::Structured { timestamp, text } => (timestamp, text),
            Self::Raw { text } => (received_at, text),
        }
    }
}
