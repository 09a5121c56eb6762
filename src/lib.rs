//! Serial Supervisor - supervised serial connections with time-windowed
//! buffering, background pattern watches, and rotating session logs.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod device;
pub mod notify;
pub mod registry;
pub mod session;
pub mod watch;
