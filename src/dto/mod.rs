//! Wire-facing payload shapes for the WebSocket protocol, lobby stream, and REST probes.

pub mod game;
pub mod health;
pub mod lobby;
pub mod validation;
pub mod ws;

use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Render a system timestamp as RFC3339 for record payloads.
pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
