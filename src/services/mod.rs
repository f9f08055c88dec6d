//! Service layer wiring transport concerns to the session engine.

pub mod lobby_service;
pub mod websocket_service;
