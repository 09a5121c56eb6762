use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Lifecycle state of one port's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Lost,
    Reconnecting,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Shared, observable state cell for one connection.
#[derive(Debug, Default)]
pub(super) struct StateCell {
    port: String,
    state: Mutex<PortState>,
}

impl StateCell {
    pub(super) fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            state: Mutex::new(PortState::Disconnected),
        }
    }

    pub(super) fn get(&self) -> PortState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn transition(&self, next: PortState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(port = self.port, from = %*state, to = %next, "Port state transition");
            *state = next;
        }
    }
}
