//! Session log error types.
//!
//! Log failures are always recovered locally; they are reported through
//! `tracing` and never interrupt a connection's read loop.

/// Errors produced by the session log writer.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    /// Draining the pending buffer to disk failed; data is retained for a
    /// later attempt.
    #[error("Session log flush failed: {source}")]
    FlushFailed {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Renumbering, deleting, or opening session files failed.
    #[error("Session log rotation failed: {source}")]
    RotationFailed {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_failed_display() {
        let err = LogError::FlushFailed {
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(err.to_string(), "Session log flush failed: disk full");
    }

    #[test]
    fn test_rotation_failed_display() {
        let err = LogError::RotationFailed {
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Session log rotation failed: denied");
    }
}
