//! Events pushed on the global lobby SSE stream.

use serde::Serialize;

/// A single lobby stream event: an optional event name plus a data payload.
#[derive(Debug, Clone)]
pub struct LobbyEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl LobbyEvent {
    /// Build an event by serializing `payload` to JSON.
    pub fn json<T: Serialize>(event: Option<String>, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event,
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Payload describing a freshly created session.
#[derive(Debug, Serialize)]
pub struct LobbySessionCreated {
    /// Join code of the new room.
    pub room_code: u32,
    /// Title of the quiz being played.
    pub title: String,
    /// Lock state at creation (always false).
    pub locked: bool,
}

/// Payload describing a lock flip on an existing session.
#[derive(Debug, Serialize)]
pub struct LobbyLockChanged {
    /// Room whose lock flipped.
    pub room_code: u32,
    /// New lock state.
    pub locked: bool,
}

/// Payload describing a removed session.
#[derive(Debug, Serialize)]
pub struct LobbySessionDeleted {
    /// Room that no longer accepts joins.
    pub room_code: u32,
}
