//! Messages exchanged over the per-participant WebSocket connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::dto::game::QuizInput;
use crate::dto::validation::validate_player_name;

/// Error raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON for any known message.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame decoded but carried an invalid payload.
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Messages accepted from participant WebSocket clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Organizer creates a new session around a frozen quiz definition.
    CreateSession {
        /// The quiz to play.
        quiz: QuizInput,
        /// Organizer-less solo variant; lifecycle cascades differ.
        #[serde(default)]
        random_mode: bool,
    },
    /// Pre-join probe answered only to the caller.
    ValidateRoomCode {
        /// Candidate room code.
        room_code: u32,
    },
    /// Player asks to join a room under a display name.
    JoinSession {
        /// Target room code.
        room_code: u32,
        /// Requested display name.
        name: String,
    },
    /// Organizer launches the pre-game countdown.
    StartGameCountdown {
        /// Countdown length; the configured default applies when omitted.
        seconds: Option<u32>,
    },
    /// Organizer flips the join lock while the room is waiting.
    ToggleLock,
    /// Organizer bans a player by name and kicks them out.
    BanPlayer {
        /// Display name of the player to ban.
        name: String,
    },
    /// Participant finished navigating to the in-game view.
    UserConnectedToGame,
    /// Organizer starts the countdown for the current question.
    StartQuestionCountdown,
    /// Organizer forces the current question to end.
    QuestionEndByTimer,
    /// Player changed their working selection on a choice question.
    UpdateSelection {
        /// Indices currently selected.
        selected: Vec<usize>,
        /// Whether the player is actively modifying their answer.
        interacting: bool,
    },
    /// Player locks in their final answer for an auto-scored question.
    FinalizePlayerAnswer {
        /// The committed answer.
        answer: FinalAnswer,
    },
    /// Player submits (or resubmits) a free-text answer.
    FreeTextSubmitted {
        /// The answer text, relayed to the organizer only.
        text: String,
    },
    /// Organizer grades the head of the pending free-text queue.
    GradeAnswer {
        /// The grade to apply.
        grade: Grade,
    },
    /// Organizer advances to the next question after a correction.
    NextQuestion,
    /// Organizer reveals the final ranking.
    ShowResults,
    /// Organizer toggles the pause state of the running countdown.
    PauseGame,
    /// Organizer triggers alert mode for the current question.
    AlertGameMode,
    /// Client signals an imminent page refresh so the next disconnect is not a leave.
    MarkRefresh,
    /// Participant intentionally leaves the session.
    LeaveSession,
    /// Unknown message type, ignored after logging.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse and validate an inbound text frame.
    pub fn from_json_str(text: &str) -> Result<Self, DecodeError> {
        let message: Self = serde_json::from_str(text)?;
        match &message {
            Self::CreateSession { quiz, .. } => quiz.validate()?,
            Self::JoinSession { name, .. } => {
                validate_player_name(name).map_err(|err| {
                    let mut errors = ValidationErrors::new();
                    errors.add("name", err);
                    errors
                })?;
            }
            _ => {}
        }
        Ok(message)
    }
}

/// A player's committed answer to an auto-scored question.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FinalAnswer {
    /// Selected choice indices for a multiple-choice question.
    Selections(Vec<usize>),
    /// Submitted value for a numeric question.
    Numeric(f64),
}

/// Grade applied to one free-text answer, mapped to a point multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    /// 0% of the question points.
    Wrong,
    /// 50% of the question points.
    Partial,
    /// 100% of the question points.
    Correct,
}

impl Grade {
    /// Point multiplier as a percentage.
    pub fn percent(self) -> u32 {
        match self {
            Grade::Wrong => 0,
            Grade::Partial => 50,
            Grade::Correct => 100,
        }
    }
}

/// Verdict returned for a pre-join room-code probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomVerdict {
    /// The room exists and accepts joins.
    ValidId,
    /// No active session carries this code.
    InvalidId,
    /// The room exists but is locked.
    RoomLocked,
}

/// Reason a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRefusal {
    /// No active session carries this code.
    InvalidId,
    /// The room is locked against new joins.
    RoomLocked,
    /// The requested name is on the room's ban list.
    BannedName,
    /// The requested name is already taken by an active player.
    NameTaken,
}

/// Reason a session ended for everyone at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The organizer disconnected before the results phase.
    OrganizerLeft,
    /// Every player left during active play.
    AllPlayersLeft,
}

/// Roster entry broadcast to the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSummary {
    /// Display name.
    pub name: String,
    /// Accumulated points.
    pub points: u32,
    /// Whether the player currently has a live in-game connection.
    pub in_game: bool,
    /// Whether the player has submitted an answer for the current question.
    pub submitted: bool,
    /// Whether the player is currently modifying their answer.
    pub interacting: bool,
}

/// Sanitized view of a question, safe to send to players.
///
/// Choice correctness flags and numeric targets never leave the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    /// Zero-based index of the question in the quiz.
    pub index: usize,
    /// Total number of questions in the quiz.
    pub total: usize,
    /// Question statement.
    pub text: String,
    /// Points at stake.
    pub points: u32,
    /// Seconds on the question clock.
    pub duration_secs: u32,
    /// Choice texts, present only for multiple-choice questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

/// Per-player point movement after a question was scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointDelta {
    /// Display name.
    pub name: String,
    /// Points gained on this question.
    pub gained: u32,
    /// New running total.
    pub total: u32,
}

/// How many answers received each grade on a free-text question.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GradeTally {
    /// Answers graded wrong.
    pub wrong: usize,
    /// Answers graded partially correct.
    pub partial: usize,
    /// Answers graded correct.
    pub correct: usize,
}

/// One row of the final ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedPlayer {
    /// Display name.
    pub name: String,
    /// Final score.
    pub points: u32,
    /// Whether this row is the declared winner.
    pub winner: bool,
}

/// Messages pushed to participant WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms session creation to the organizer.
    SessionCreated {
        /// Code other participants use to join.
        room_code: u32,
    },
    /// Answer to a [`ClientMessage::ValidateRoomCode`] probe.
    RoomValidation {
        /// The probed code.
        room_code: u32,
        /// Existence and lock verdict.
        verdict: RoomVerdict,
    },
    /// Join accepted; sent to the joining player.
    CanJoin {
        /// The probed code.
        room_code: u32,
        /// The name the seat was granted under.
        name: String,
    },
    /// Join refused; sent to the caller only.
    JoinRefused {
        /// Why the join was refused.
        reason: JoinRefusal,
    },
    /// A player joined; broadcast to the room.
    JoinSuccess {
        /// Name of the new player.
        name: String,
    },
    /// Full roster snapshot, broadcast after any roster change.
    RosterUpdate {
        /// Current players in join order.
        players: Vec<PlayerSummary>,
    },
    /// The join lock flipped.
    LockChanged {
        /// New lock state.
        locked: bool,
    },
    /// The pre-game countdown elapsed and the game is starting.
    GameStarting {
        /// Quiz title.
        title: String,
    },
    /// Countdown display update.
    Tick {
        /// Seconds left.
        remaining: u32,
    },
    /// A question is now active.
    Question {
        /// Sanitized question payload.
        question: QuestionView,
    },
    /// Live per-choice selection counts; organizer only.
    SelectionTally {
        /// Count of players currently selecting each choice.
        counts: Vec<usize>,
    },
    /// A player started or stopped modifying their answer; organizer only.
    PlayerInteracting {
        /// Player name.
        name: String,
        /// New interaction state.
        interacting: bool,
    },
    /// A player locked in an answer; organizer only.
    PlayerSubmitted {
        /// Player name.
        name: String,
    },
    /// Head of the free-text grading queue; organizer only.
    PendingAnswer {
        /// Player whose answer is up for grading.
        player: String,
        /// The submitted text.
        text: String,
        /// Answers left in the queue, this one included.
        left: usize,
    },
    /// Aggregate outcome of a scored question, broadcast to the room.
    QuestionResults {
        /// Per-player point movements.
        deltas: Vec<PointDelta>,
        /// Per-grade counts (free-text questions only, zeroed otherwise).
        grade_counts: GradeTally,
        /// Per-player exact-match correctness; organizer display data.
        correctness: Vec<(String, bool)>,
        /// True when the quiz has no further question.
        game_finished: bool,
    },
    /// The pause state flipped.
    PauseChanged {
        /// New pause state.
        paused: bool,
    },
    /// Alert mode engaged for the current question.
    AlertStarted,
    /// Final ranking, broadcast once.
    Results {
        /// Players ordered best-first.
        ranking: Vec<RankedPlayer>,
    },
    /// The session ended for everyone.
    SessionEnded {
        /// Why the session ended.
        reason: EndReason,
    },
    /// A player was removed from the roster.
    PlayerRemoved {
        /// Name of the removed player.
        name: String,
        /// True when the removal was a ban.
        banned: bool,
    },
    /// Human-readable room notice (e.g. someone left the results page).
    SystemNotice {
        /// Notice text.
        message: String,
    },
    /// Non-fatal error feedback for the caller.
    ErrorNotice {
        /// What went wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_join_message() {
        let message =
            ClientMessage::from_json_str(r#"{"type": "join_session", "room_code": 4217, "name": "Ana"}"#)
                .unwrap();
        assert!(matches!(
            message,
            ClientMessage::JoinSession { room_code: 4217, .. }
        ));
    }

    #[test]
    fn join_with_reserved_name_fails_validation() {
        let result = ClientMessage::from_json_str(
            r#"{"type": "join_session", "room_code": 4217, "name": "organizer"}"#,
        );
        assert!(matches!(result, Err(DecodeError::Validation(_))));
    }

    #[test]
    fn create_session_validates_quiz() {
        let result = ClientMessage::from_json_str(
            r#"{"type": "create_session", "quiz": {"title": "", "questions": []}}"#,
        );
        assert!(matches!(result, Err(DecodeError::Validation(_))));
    }

    #[test]
    fn unknown_types_decode_to_unknown() {
        let message = ClientMessage::from_json_str(r#"{"type": "dance"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
    }

    #[test]
    fn final_answer_accepts_both_shapes() {
        let selections = ClientMessage::from_json_str(
            r#"{"type": "finalize_player_answer", "answer": [0, 2]}"#,
        )
        .unwrap();
        assert!(matches!(
            selections,
            ClientMessage::FinalizePlayerAnswer {
                answer: FinalAnswer::Selections(_)
            }
        ));

        let numeric = ClientMessage::from_json_str(
            r#"{"type": "finalize_player_answer", "answer": 12.5}"#,
        )
        .unwrap();
        assert!(matches!(
            numeric,
            ClientMessage::FinalizePlayerAnswer {
                answer: FinalAnswer::Numeric(_)
            }
        ));
    }

    #[test]
    fn grade_multipliers_match_the_scale() {
        assert_eq!(Grade::Wrong.percent(), 0);
        assert_eq!(Grade::Partial.percent(), 50);
        assert_eq!(Grade::Correct.percent(), 100);
    }
}
