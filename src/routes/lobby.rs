use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::lobby_service, state::SharedState};

/// Stream lobby lifecycle events (session created, lock flips, session
/// deleted) to connected frontends.
pub async fn lobby_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = lobby_service::subscribe(&state);
    info!("new lobby SSE connection");
    lobby_service::to_sse_stream(receiver)
}

/// Configure the lobby SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/lobby/events", get(lobby_events))
}
