//! Per-room session data: roster, organizer, frozen quiz, and scoring state.

use std::collections::HashSet;
use std::time::SystemTime;

use axum::extract::ws::Message;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dto::ws::{JoinRefusal, PlayerSummary, RankedPlayer};
use crate::state::answers::QuestionAnswers;
use crate::state::game::Quiz;
use crate::state::state_machine::SessionStateMachine;

/// Identifier of one WebSocket connection.
pub type ConnId = Uuid;
/// Handle used to push frames to a connected participant.
pub type OutboundTx = mpsc::UnboundedSender<Message>;

/// The single host of a session.
#[derive(Debug)]
pub struct Organizer {
    /// Connection the organizer is attached to.
    pub conn: ConnId,
    /// Outbound frame channel.
    pub tx: OutboundTx,
    /// True once the organizer navigated to the in-game view.
    pub in_game: bool,
    /// One-shot marker set before a page refresh.
    pub pending_refresh: bool,
}

/// A participant answering questions.
#[derive(Debug)]
pub struct Player {
    /// Connection the player is attached to.
    pub conn: ConnId,
    /// Outbound frame channel.
    pub tx: OutboundTx,
    /// Accumulated points.
    pub points: u32,
    /// True while the player has a live in-game connection.
    pub in_game: bool,
    /// True while the player is modifying their answer.
    pub interacting: bool,
    /// True once the player committed an answer for the current question.
    pub submitted: bool,
    /// One-shot marker set before a page refresh.
    pub pending_refresh: bool,
}

impl Player {
    fn new(conn: ConnId, tx: OutboundTx) -> Self {
        Self {
            conn,
            tx,
            points: 0,
            in_game: false,
            interacting: false,
            submitted: false,
            pending_refresh: false,
        }
    }
}

/// Outcome of an accepted join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A brand new seat was created.
    New,
    /// An existing seat was reclaimed after a page refresh.
    Reattached,
}

/// All mutable state owned by one room's actor.
#[derive(Debug)]
pub struct Session {
    /// Join code of the room.
    pub code: u32,
    /// Frozen quiz copy taken at creation.
    pub quiz: Quiz,
    /// Index of the question currently in play.
    pub current_index: usize,
    /// Phase machine for this room.
    pub machine: SessionStateMachine,
    /// The host; cleared only when the organizer leaves the results page.
    pub organizer: Option<Organizer>,
    /// Active players keyed by display name, in join order.
    pub roster: IndexMap<String, Player>,
    /// Players removed while the game was running, with their final points.
    pub removed_in_game: Vec<(String, u32)>,
    /// Lowercased names refused at join time.
    pub banned: HashSet<String>,
    /// When set, new joins are refused.
    pub locked: bool,
    /// Organizer-less solo variant.
    pub random_mode: bool,
    /// Guards the once-only results broadcast and record hand-off.
    pub results_shown: bool,
    /// True once the current question was broadcast to the room.
    pub question_issued: bool,
    /// Per-question transient answer state.
    pub answers: QuestionAnswers,
    /// When the pre-game countdown was started; None until then.
    pub started_at: Option<SystemTime>,
}

impl Session {
    /// Build a fresh session in the waiting phase.
    pub fn new(code: u32, quiz: Quiz, organizer: (ConnId, OutboundTx), random_mode: bool) -> Self {
        let (conn, tx) = organizer;
        Self {
            code,
            quiz,
            current_index: 0,
            machine: SessionStateMachine::new(),
            organizer: Some(Organizer {
                conn,
                tx,
                in_game: false,
                pending_refresh: false,
            }),
            roster: IndexMap::new(),
            removed_in_game: Vec::new(),
            banned: HashSet::new(),
            locked: false,
            random_mode,
            results_shown: false,
            question_issued: false,
            answers: QuestionAnswers::default(),
            started_at: None,
        }
    }

    /// Admit a player, enforcing the lock, ban list, and name uniqueness rules.
    pub fn admit(
        &mut self,
        name: &str,
        conn: ConnId,
        tx: OutboundTx,
    ) -> Result<JoinOutcome, JoinRefusal> {
        let trimmed = name.trim();
        let lowered = trimmed.to_lowercase();

        if self.banned.contains(&lowered) {
            return Err(JoinRefusal::BannedName);
        }

        // A seat parked by a refresh marker can be reclaimed under the same name
        // even while the room is locked: the player never really left.
        if let Some((_, player)) = self
            .roster
            .iter_mut()
            .find(|(existing, _)| existing.to_lowercase() == lowered)
        {
            if player.pending_refresh {
                player.conn = conn;
                player.tx = tx;
                player.pending_refresh = false;
                return Ok(JoinOutcome::Reattached);
            }
            return Err(JoinRefusal::NameTaken);
        }

        if self.locked {
            return Err(JoinRefusal::RoomLocked);
        }

        self.roster
            .insert(trimmed.to_string(), Player::new(conn, tx));
        Ok(JoinOutcome::New)
    }

    /// Display name of the player attached to `conn`.
    pub fn player_name_by_conn(&self, conn: ConnId) -> Option<String> {
        self.roster
            .iter()
            .find(|(_, player)| player.conn == conn)
            .map(|(name, _)| name.clone())
    }

    /// True when `conn` is the organizer's connection.
    pub fn is_organizer_conn(&self, conn: ConnId) -> bool {
        self.organizer
            .as_ref()
            .is_some_and(|organizer| organizer.conn == conn)
    }

    /// Roster snapshot for broadcasts.
    pub fn roster_summaries(&self) -> Vec<PlayerSummary> {
        self.roster
            .iter()
            .map(|(name, player)| PlayerSummary {
                name: name.clone(),
                points: player.points,
                in_game: player.in_game,
                submitted: player.submitted,
                interacting: player.interacting,
            })
            .collect()
    }

    /// True when at least one player is present and every present player submitted.
    pub fn all_present_submitted(&self) -> bool {
        let mut any = false;
        for player in self.roster.values() {
            if player.in_game {
                any = true;
                if !player.submitted {
                    return false;
                }
            }
        }
        any
    }

    /// Clear per-question player flags ahead of the next question.
    pub fn reset_question_flags(&mut self) {
        for player in self.roster.values_mut() {
            player.submitted = false;
            player.interacting = false;
        }
    }

    /// Final ranking over active and removed players, best score first,
    /// ties broken alphabetically. The winner flag goes to the highest-scoring
    /// player that is still present.
    pub fn ranking(&self) -> Vec<RankedPlayer> {
        let mut rows: Vec<(String, u32, bool)> = self
            .roster
            .iter()
            .map(|(name, player)| (name.clone(), player.points, player.in_game))
            .chain(
                self.removed_in_game
                    .iter()
                    .map(|(name, points)| (name.clone(), *points, false)),
            )
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let winner = rows
            .iter()
            .filter(|(_, _, present)| *present)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(name, _, _)| name.clone());

        rows.into_iter()
            .map(|(name, points, _)| RankedPlayer {
                winner: winner.as_deref() == Some(&name),
                name,
                points,
            })
            .collect()
    }

    /// True when the question at `current_index` is the last of the quiz.
    pub fn on_last_question(&self) -> bool {
        self.current_index + 1 >= self.quiz.questions.len()
    }
}
