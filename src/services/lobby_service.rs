//! Fan-out of global lobby notifications onto the SSE hub.

use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::dto::lobby::{LobbyEvent, LobbyLockChanged, LobbySessionCreated, LobbySessionDeleted};
use crate::state::SharedState;

/// Subscribe to the shared lobby stream.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<LobbyEvent> {
    state.lobby().subscribe()
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<LobbyEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }

        tracing::info!("lobby SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Announce a freshly created session to lobby listings.
pub fn broadcast_session_created(state: &SharedState, room_code: u32, title: &str) {
    if let Ok(event) = LobbyEvent::json(
        Some("session_created".to_string()),
        &LobbySessionCreated {
            room_code,
            title: title.to_string(),
            locked: false,
        },
    ) {
        state.lobby().broadcast(event);
    }
}

/// Announce a lock flip so lobby listings refresh.
pub fn broadcast_lock_changed(state: &SharedState, room_code: u32, locked: bool) {
    if let Ok(event) = LobbyEvent::json(
        Some("lock_changed".to_string()),
        &LobbyLockChanged { room_code, locked },
    ) {
        state.lobby().broadcast(event);
    }
}

/// Announce a removed session so lobby listings drop the entry.
pub fn broadcast_session_deleted(state: &SharedState, room_code: u32) {
    if let Ok(event) = LobbyEvent::json(
        Some("session_deleted".to_string()),
        &LobbySessionDeleted { room_code },
    ) {
        state.lobby().broadcast(event);
    }
}
