//! Broadcast hub feeding the global lobby SSE stream.

use tokio::sync::broadcast;

use crate::dto::lobby::LobbyEvent;

/// Simple broadcast hub wrapper used by the lobby SSE service.
pub struct LobbyHub {
    sender: broadcast::Sender<LobbyEvent>,
}

impl LobbyHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: LobbyEvent) {
        let _ = self.sender.send(event);
    }
}
