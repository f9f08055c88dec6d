use axum::Router;

use crate::state::SharedState;

pub mod health;
pub mod lobby;
pub mod records;
pub mod websocket;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(lobby::router())
        .merge(records::router());

    websocket::router()
        .nest("/api", api_router)
        .with_state(state)
}
