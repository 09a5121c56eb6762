//! Background watch tasks that scan incoming lines for regex patterns.

mod error;
mod scheduler;
mod task;

pub use error::WatchError;
pub use scheduler::WatchScheduler;
pub use task::{WatchConfig, WatchSnapshot, WatchStatus, WatchTask, DEFAULT_BUFFER_LINES};
