use thiserror::Error;

use crate::device::DeviceError;

/// Errors from connecting or disconnecting a port.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("unknown port: {0}")]
    PortNotFound(String),

    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: DeviceError,
    },
}

/// Errors from writing to a connected port.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("write to {port} failed: {source}")]
    WriteFailed {
        port: String,
        #[source]
        source: DeviceError,
    },
}
