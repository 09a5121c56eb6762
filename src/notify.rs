//! Injected host-notification capability.
//!
//! The core never checks whether a UI host is attached; callers inject a
//! [`ConnectionNotifier`] and get a no-op implementation by default.

/// Connection lifecycle events surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was opened by an explicit `connect` call.
    Established,
    /// A live connection was lost unexpectedly.
    Lost,
    /// A lost connection was reopened by the reconnect loop.
    Restored,
    /// The user explicitly disconnected the port.
    UserDisconnected,
}

impl ConnectionEvent {
    /// Marker line fanned out through the data path for this event.
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Established => "=== CONNECTION ESTABLISHED ===",
            Self::Lost => "=== CONNECTION LOST ===",
            Self::Restored => "=== CONNECTION RESTORED ===",
            Self::UserDisconnected => "=== DISCONNECTED BY USER ===",
        }
    }
}

/// Capability interface for surfacing connection events to a host.
pub trait ConnectionNotifier: Send + Sync {
    /// Called by the connection supervisor on every lifecycle transition.
    fn connection_event(&self, port: &str, event: ConnectionEvent);
}

/// Notifier that discards all events; supplied when no host is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ConnectionNotifier for NoopNotifier {
    fn connection_event(&self, _port: &str, _event: ConnectionEvent) {}
}
