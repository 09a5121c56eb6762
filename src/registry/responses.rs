//! Serializable response shapes returned by the registry.

use std::path::PathBuf;

use serde::Serialize;

use crate::buffer::BufferEntry;
use crate::connection::PortState;

/// Result of a successful connect.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectInfo {
    pub port: String,
    pub baud: u32,
    /// Session log file, when session logging is enabled.
    pub log_file: Option<PathBuf>,
}

/// Result of a timed read.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResponse {
    pub port: String,
    pub duration_seconds: f64,
    pub total_lines: usize,
    /// Lines that arrived while the read was waiting.
    pub lines_during_read: usize,
    pub buffer_seconds: u64,
    pub data: Vec<BufferEntry>,
}

/// Buffered history for one port.
#[derive(Debug, Clone, Serialize)]
pub struct BufferResponse {
    pub port: String,
    /// Window the data covers: the caller's request, or the full buffer
    /// retention window.
    pub buffer_seconds: u64,
    pub total_lines: usize,
    pub data: Vec<BufferEntry>,
}

/// Connection state of one known port.
#[derive(Debug, Clone, Serialize)]
pub struct PortStatus {
    pub port: String,
    pub state: PortState,
    pub connected: bool,
}
