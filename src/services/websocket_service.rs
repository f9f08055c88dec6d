//! Per-connection WebSocket lifecycle and command routing.
//!
//! The gateway owns nothing but the socket: it parses frames, tracks which
//! role the connection has acquired, and forwards commands into the right
//! room's serialized stream. All session state lives behind the room actor.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dto::ws::{ClientMessage, JoinRefusal, RoomVerdict, ServerMessage};
use crate::state::SharedState;
use crate::state::actor::{SessionCommand, spawn_session};
use crate::state::game::Quiz;
use crate::state::session::{ConnId, OutboundTx};

/// Role a connection has acquired in a room, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Not attached to any room yet.
    Visitor,
    /// Host of the room with this code.
    Organizer(u32),
    /// Player seated in the room with this code.
    Player(u32),
}

impl Role {
    fn room(self) -> Option<u32> {
        match self {
            Role::Visitor => None,
            Role::Organizer(code) | Role::Player(code) => Some(code),
        }
    }
}

/// Handle the full lifecycle of one participant WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let conn: ConnId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    info!(conn = %conn, "websocket connected");
    let mut role = Role::Visitor;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(inbound) => {
                    dispatch(&state, &mut role, conn, &outbound_tx, inbound).await;
                }
                Err(err) => {
                    warn!(conn = %conn, error = %err, "failed to parse or validate client message");
                    send_message_to_websocket(
                        &outbound_tx,
                        &ServerMessage::ErrorNotice {
                            message: err.to_string(),
                        },
                        "decode feedback",
                    );
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(conn = %conn, "websocket closed by peer");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(conn = %conn, error = %err, "websocket error");
                break;
            }
        }
    }

    // The registry still knows the room unless the actor already detached us
    // (leave, ban, teardown), which keeps the disconnect signal idempotent.
    if let Some(code) = state.registry().room_of(conn) {
        if let Some(handle) = state.registry().lookup(code) {
            let _ = handle.tx.send(SessionCommand::Disconnected { conn });
        }
    }

    info!(conn = %conn, "websocket disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Route one parsed message according to the connection's current role.
async fn dispatch(
    state: &SharedState,
    role: &mut Role,
    conn: ConnId,
    outbound_tx: &OutboundTx,
    message: ClientMessage,
) {
    match message {
        ClientMessage::CreateSession { quiz, random_mode } => {
            if *role != Role::Visitor {
                refuse(outbound_tx, "already attached to a session");
                return;
            }
            match spawn_session(
                state,
                Quiz::from(quiz),
                (conn, outbound_tx.clone()),
                random_mode,
            ) {
                Ok(handle) => {
                    *role = Role::Organizer(handle.code);
                    send_message_to_websocket(
                        outbound_tx,
                        &ServerMessage::SessionCreated {
                            room_code: handle.code,
                        },
                        "session creation",
                    );
                }
                Err(err) => {
                    warn!(conn = %conn, error = %err, "session creation failed");
                    refuse(outbound_tx, "could not create the session");
                }
            }
        }
        ClientMessage::ValidateRoomCode { room_code } => {
            let verdict = probe_room(state, room_code).await;
            send_message_to_websocket(
                outbound_tx,
                &ServerMessage::RoomValidation { room_code, verdict },
                "room validation",
            );
        }
        ClientMessage::JoinSession { room_code, name } => {
            if *role != Role::Visitor {
                refuse(outbound_tx, "already attached to a session");
                return;
            }
            let Some(handle) = state.registry().lookup(room_code) else {
                send_message_to_websocket(
                    outbound_tx,
                    &ServerMessage::JoinRefused {
                        reason: JoinRefusal::InvalidId,
                    },
                    "join refusal",
                );
                return;
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            let sent = handle.tx.send(SessionCommand::Join {
                name,
                conn,
                tx: outbound_tx.clone(),
                reply: reply_tx,
            });
            // Await the verdict before reading on so a quick disconnect
            // cannot race the seat assignment.
            match reply_rx.await {
                Ok(Ok(_)) if sent.is_ok() => *role = Role::Player(room_code),
                Ok(_) => {}
                Err(_) => {
                    send_message_to_websocket(
                        outbound_tx,
                        &ServerMessage::JoinRefused {
                            reason: JoinRefusal::InvalidId,
                        },
                        "join refusal",
                    );
                }
            }
        }
        ClientMessage::UserConnectedToGame => {
            forward(state, *role, SessionCommand::Connected { conn });
        }
        ClientMessage::StartGameCountdown { seconds } => {
            forward_organizer(state, *role, conn, SessionCommand::StartGameCountdown { seconds });
        }
        ClientMessage::ToggleLock => {
            forward_organizer(state, *role, conn, SessionCommand::ToggleLock);
        }
        ClientMessage::BanPlayer { name } => {
            forward_organizer(state, *role, conn, SessionCommand::BanPlayer { name });
        }
        ClientMessage::StartQuestionCountdown => {
            forward_organizer(state, *role, conn, SessionCommand::StartQuestionCountdown);
        }
        ClientMessage::QuestionEndByTimer => {
            forward_organizer(state, *role, conn, SessionCommand::QuestionEndByTimer);
        }
        ClientMessage::UpdateSelection {
            selected,
            interacting,
        } => {
            forward_player(
                state,
                *role,
                conn,
                SessionCommand::UpdateSelection {
                    conn,
                    selected,
                    interacting,
                },
            );
        }
        ClientMessage::FinalizePlayerAnswer { answer } => {
            forward_player(state, *role, conn, SessionCommand::FinalizeAnswer { conn, answer });
        }
        ClientMessage::FreeTextSubmitted { text } => {
            forward_player(state, *role, conn, SessionCommand::FreeTextSubmitted { conn, text });
        }
        ClientMessage::GradeAnswer { grade } => {
            forward_organizer(state, *role, conn, SessionCommand::GradeAnswer { grade });
        }
        ClientMessage::NextQuestion => {
            forward_organizer(state, *role, conn, SessionCommand::NextQuestion);
        }
        ClientMessage::ShowResults => {
            forward_organizer(state, *role, conn, SessionCommand::ShowResults);
        }
        ClientMessage::PauseGame => {
            forward_organizer(state, *role, conn, SessionCommand::TogglePause);
        }
        ClientMessage::AlertGameMode => {
            forward_organizer(state, *role, conn, SessionCommand::StartAlert);
        }
        ClientMessage::MarkRefresh => {
            forward(state, *role, SessionCommand::MarkRefresh { conn });
        }
        ClientMessage::LeaveSession => {
            forward(state, *role, SessionCommand::Disconnected { conn });
            *role = Role::Visitor;
        }
        ClientMessage::Unknown => {
            warn!(conn = %conn, "ignoring unknown message type");
        }
    }
}

/// Resolve the existence and lock state of a room without joining it.
async fn probe_room(state: &SharedState, room_code: u32) -> RoomVerdict {
    let Some(handle) = state.registry().lookup(room_code) else {
        return RoomVerdict::InvalidId;
    };
    let (reply_tx, reply_rx) = oneshot::channel();
    if handle.tx.send(SessionCommand::QueryLock { reply: reply_tx }).is_err() {
        return RoomVerdict::InvalidId;
    }
    match reply_rx.await {
        Ok(true) => RoomVerdict::RoomLocked,
        Ok(false) => RoomVerdict::ValidId,
        // The room died between lookup and query.
        Err(_) => RoomVerdict::InvalidId,
    }
}

/// Forward a command into the room the connection belongs to, whatever the role.
fn forward(state: &SharedState, role: Role, command: SessionCommand) {
    let Some(code) = role.room() else {
        return;
    };
    if let Some(handle) = state.registry().lookup(code) {
        let _ = handle.tx.send(command);
    }
}

/// Forward an organizer command, dropping it when the caller is not the host.
fn forward_organizer(state: &SharedState, role: Role, conn: ConnId, command: SessionCommand) {
    let Role::Organizer(code) = role else {
        warn!(conn = %conn, ?command, "organizer command from a non-organizer connection");
        return;
    };
    if let Some(handle) = state.registry().lookup(code) {
        let _ = handle.tx.send(command);
    }
}

/// Forward a player command, dropping it when the caller holds no seat.
fn forward_player(state: &SharedState, role: Role, conn: ConnId, command: SessionCommand) {
    let Role::Player(code) = role else {
        warn!(conn = %conn, ?command, "player command from a non-player connection");
        return;
    };
    if let Some(handle) = state.registry().lookup(code) {
        let _ = handle.tx.send(command);
    }
}

fn refuse(tx: &OutboundTx, message: &str) {
    send_message_to_websocket(
        tx,
        &ServerMessage::ErrorNotice {
            message: message.to_string(),
        },
        "command refusal",
    );
}

/// Serialize a payload and push it onto a connection's writer channel.
///
/// Both failure modes are terminal for the individual message only: a
/// serialization failure is a bug worth logging, a closed writer means the
/// peer is already gone and the disconnect path will clean up.
pub fn send_message_to_websocket<T>(tx: &OutboundTx, value: &T, context: &str)
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, context, "failed to serialize message `{value:?}`");
            return;
        }
    };
    if tx.send(Message::Text(payload.into())).is_err() {
        warn!(context, "writer channel closed, message dropped");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: OutboundTx) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
