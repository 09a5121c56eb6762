//! Per-port connection supervision: open, read loop, auto-reconnect.

mod error;
mod state;
mod supervisor;

pub use error::{ConnectionError, SendError};
pub use state::PortState;
pub use supervisor::{Connection, ConnectionParts, DEFAULT_RECONNECT_DELAY};
