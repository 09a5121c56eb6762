//! Durable, rotating session log writer.
//!
//! One session spans one connection attempt. Data is queued in memory and
//! drained to disk on a flush interval so the read loop never blocks on
//! disk latency.

mod error;
mod rotation;
mod writer;

pub use error::LogError;
pub use writer::SessionLogWriter;
