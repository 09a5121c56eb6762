//! Configuration types and TOML loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration snapshot for the supervision core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Retention window for per-port history buffers, in seconds.
    pub buffer_seconds: u64,
    /// Delay between automatic reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// Baud rate used when a watch auto-connects a port.
    pub default_baud: u32,
    /// Session log settings.
    pub session: SessionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: crate::buffer::DEFAULT_WINDOW_SECONDS,
            reconnect_delay_secs: crate::connection::DEFAULT_RECONNECT_DELAY.as_secs(),
            default_baud: 115_200,
            session: SessionConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Session log settings, snapshotted at each session start.
///
/// Changes made to a live registry's config apply to subsequent sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Master switch; when false the log writer is a no-op.
    pub enabled: bool,
    /// Maximum number of rotated session files retained per directory.
    pub max_files: usize,
    /// Size threshold that triggers a mid-stream session restart.
    pub max_size_bytes: u64,
    /// Maximum session duration in seconds; 0 means unbounded.
    pub timeout_seconds: u64,
    /// Seconds between pending-buffer flushes; 0 flushes only at session end.
    pub flush_interval_seconds: u64,
    /// Directory holding session log files.
    pub directory: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_files: 10,
            max_size_bytes: 10 * 1024 * 1024,
            timeout_seconds: 0,
            flush_interval_seconds: 5,
            directory: default_session_dir(),
        }
    }
}

/// Returns the default directory for session log files.
///
/// This is `~/.local/share/serial-supervisor/sessions` on Unix systems.
#[must_use]
pub fn default_session_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("serial-supervisor")
        .join("sessions")
}
