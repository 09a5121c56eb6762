use thiserror::Error;

use crate::connection::ConnectionError;

/// Errors from creating or looking up watch tasks.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid watch pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no patterns given")]
    NoPatterns,

    #[error("no watch task with id {0}")]
    TaskNotFound(uuid::Uuid),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
