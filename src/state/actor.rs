//! Actor-per-room event loop serializing every operation on one session.
//!
//! All joins, answers, grades, disconnects, and timer ticks for a room travel
//! through one unbounded channel and are processed in order by a single task,
//! so state transitions never interleave destructively. Rooms run fully in
//! parallel; the only shared mutable state between them is the registry's two
//! lookup indices.

use std::collections::HashMap;
use std::time::SystemTime;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::dao::models::GameRecord;
use crate::dto::format_system_time;
use crate::dto::ws::{
    EndReason, FinalAnswer, Grade, GradeTally, JoinRefusal, PointDelta, ServerMessage,
};
use crate::error::ServiceError;
use crate::services::websocket_service::send_message_to_websocket;
use crate::services::lobby_service;
use crate::state::SharedState;
use crate::state::answers::is_correct;
use crate::state::game::Quiz;
use crate::state::registry::SessionHandle;
use crate::state::session::{ConnId, JoinOutcome, OutboundTx, Session};
use crate::state::state_machine::{GamingPhase, SessionEvent, SessionPhase};
use crate::state::timer::{Countdown, TickOutcome};

/// Commands accepted by a room's serialized event stream.
#[derive(Debug)]
pub enum SessionCommand {
    /// A player asks for a seat.
    Join {
        /// Requested display name.
        name: String,
        /// Connection asking to join.
        conn: ConnId,
        /// Outbound frame channel for the joining client.
        tx: OutboundTx,
        /// Resolved so the gateway can track its role before reading on.
        reply: oneshot::Sender<Result<JoinOutcome, JoinRefusal>>,
    },
    /// A participant finished navigating to the in-game view.
    Connected {
        /// The connection that is now present.
        conn: ConnId,
    },
    /// Organizer launches the pre-game countdown.
    StartGameCountdown {
        /// Countdown length; configured default when omitted.
        seconds: Option<u32>,
    },
    /// Organizer flips the join lock.
    ToggleLock,
    /// Organizer bans a player by name.
    BanPlayer {
        /// Name to ban.
        name: String,
    },
    /// Organizer (re)starts the current question's countdown.
    StartQuestionCountdown,
    /// Organizer forces the current question to end.
    QuestionEndByTimer,
    /// A player changed their working selection.
    UpdateSelection {
        /// Connection of the player.
        conn: ConnId,
        /// Indices currently selected.
        selected: Vec<usize>,
        /// Whether the player is actively editing.
        interacting: bool,
    },
    /// A player locked in a final answer.
    FinalizeAnswer {
        /// Connection of the player.
        conn: ConnId,
        /// The committed answer.
        answer: FinalAnswer,
    },
    /// A player submitted a free-text answer.
    FreeTextSubmitted {
        /// Connection of the player.
        conn: ConnId,
        /// The answer text.
        text: String,
    },
    /// Organizer grades the head of the pending queue.
    GradeAnswer {
        /// The grade to apply.
        grade: Grade,
    },
    /// Organizer advances to the next question.
    NextQuestion,
    /// Organizer reveals the final ranking.
    ShowResults,
    /// Organizer toggles the countdown pause state.
    TogglePause,
    /// Organizer engages alert mode.
    StartAlert,
    /// Client announced an imminent page refresh.
    MarkRefresh {
        /// Connection about to drop.
        conn: ConnId,
    },
    /// A participant's socket closed.
    Disconnected {
        /// The dropped connection.
        conn: ConnId,
    },
    /// Pre-join probe for the lock state.
    QueryLock {
        /// Resolved with the current lock flag.
        reply: oneshot::Sender<bool>,
    },
    /// Wake-up from the countdown ticker task.
    TimerTick {
        /// Generation stamp; stale generations are discarded.
        generation: u64,
    },
}

/// What the active countdown is timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPurpose {
    PreGame,
    Question,
}

enum Flow {
    Continue,
    Stop,
}

/// Create a new session, spawn its actor, and register it.
pub fn spawn_session(
    state: &SharedState,
    quiz: Quiz,
    organizer: (ConnId, OutboundTx),
    random_mode: bool,
) -> Result<SessionHandle, ServiceError> {
    let code = state.registry().allocate_code(state.config())?;
    let (tx, rx) = mpsc::unbounded_channel();

    let title = quiz.title.clone();
    let organizer_conn = organizer.0;
    let session = Session::new(code, quiz, organizer, random_mode);

    let actor = SessionActor {
        state: state.clone(),
        session,
        rx,
        tx: tx.clone(),
        countdown: Countdown::new(
            state.config().tick_interval(),
            state.config().alert_tick_interval(),
        ),
        timer_purpose: TimerPurpose::PreGame,
        gains: HashMap::new(),
    };
    tokio::spawn(actor.run());

    let handle = SessionHandle { code, tx };
    state.registry().insert(handle.clone());
    state.registry().bind(organizer_conn, code);
    lobby_service::broadcast_session_created(state, code, &title);
    info!(room = code, random_mode, "session created");

    Ok(handle)
}

/// One room's event loop plus the state it owns outright.
struct SessionActor {
    state: SharedState,
    session: Session,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    /// Cloned into ticker tasks so timer ticks join the serialized stream.
    tx: mpsc::UnboundedSender<SessionCommand>,
    countdown: Countdown,
    timer_purpose: TimerPurpose,
    /// Points gained per player on the current question.
    gains: HashMap<String, u32>,
}

impl SessionActor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match self.handle(command) {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }
        // The countdown must die with the room so no ticker outlives it.
        self.countdown.stop();
        info!(room = self.session.code, "session actor stopped");
    }

    fn handle(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Join {
                name,
                conn,
                tx,
                reply,
            } => self.on_join(name, conn, tx, reply),
            SessionCommand::Connected { conn } => self.on_connected(conn),
            SessionCommand::StartGameCountdown { seconds } => self.on_start_game(seconds),
            SessionCommand::ToggleLock => self.on_toggle_lock(),
            SessionCommand::BanPlayer { name } => return self.on_ban(&name),
            SessionCommand::StartQuestionCountdown => self.on_start_question_countdown(),
            SessionCommand::QuestionEndByTimer => self.on_question_end_by_timer(),
            SessionCommand::UpdateSelection {
                conn,
                selected,
                interacting,
            } => self.on_update_selection(conn, selected, interacting),
            SessionCommand::FinalizeAnswer { conn, answer } => self.on_finalize(conn, answer),
            SessionCommand::FreeTextSubmitted { conn, text } => self.on_free_text(conn, text),
            SessionCommand::GradeAnswer { grade } => self.on_grade(grade),
            SessionCommand::NextQuestion => self.on_next_question(),
            SessionCommand::ShowResults => self.on_show_results(),
            SessionCommand::TogglePause => self.on_toggle_pause(),
            SessionCommand::StartAlert => self.on_start_alert(),
            SessionCommand::MarkRefresh { conn } => self.on_mark_refresh(conn),
            SessionCommand::Disconnected { conn } => return self.on_disconnected(conn),
            SessionCommand::QueryLock { reply } => {
                let _ = reply.send(self.session.locked);
            }
            SessionCommand::TimerTick { generation } => return self.on_tick(generation),
        }
        Flow::Continue
    }

    // ---- lobby and roster -------------------------------------------------

    fn on_join(
        &mut self,
        name: String,
        conn: ConnId,
        tx: OutboundTx,
        reply: oneshot::Sender<Result<JoinOutcome, JoinRefusal>>,
    ) {
        let outcome = self.session.admit(name.trim(), conn, tx.clone());
        match outcome {
            Ok(kind) => {
                self.state.registry().bind(conn, self.session.code);
                send_message_to_websocket(
                    &tx,
                    &ServerMessage::CanJoin {
                        room_code: self.session.code,
                        name: name.trim().to_string(),
                    },
                    "join confirmation",
                );
                if kind == JoinOutcome::New {
                    self.broadcast(&ServerMessage::JoinSuccess {
                        name: name.trim().to_string(),
                    });
                }
                self.broadcast_roster();
                info!(room = self.session.code, player = %name.trim(), ?kind, "player joined");
            }
            Err(reason) => {
                send_message_to_websocket(
                    &tx,
                    &ServerMessage::JoinRefused { reason },
                    "join refusal",
                );
            }
        }
        let _ = reply.send(outcome);
    }

    fn on_connected(&mut self, conn: ConnId) {
        if self.session.is_organizer_conn(conn) {
            if let Some(organizer) = self.session.organizer.as_mut() {
                organizer.in_game = true;
            }
        } else if let Some(name) = self.session.player_name_by_conn(conn) {
            if let Some(player) = self.session.roster.get_mut(&name) {
                player.in_game = true;
            }
        } else {
            return;
        }

        self.broadcast_roster();
        self.maybe_issue_question();
    }

    fn on_toggle_lock(&mut self) {
        if self.session.machine.phase() != SessionPhase::Waiting {
            warn!(room = self.session.code, "lock toggle ignored outside waiting phase");
            return;
        }
        self.session.locked = !self.session.locked;
        let locked = self.session.locked;
        self.broadcast(&ServerMessage::LockChanged { locked });
        lobby_service::broadcast_lock_changed(&self.state, self.session.code, locked);
    }

    fn on_ban(&mut self, name: &str) -> Flow {
        let lowered = name.trim().to_lowercase();
        self.session.banned.insert(lowered.clone());
        // The seat is keyed by the name as it was typed at join time.
        let Some(seat_name) = self
            .session
            .roster
            .keys()
            .find(|existing| existing.to_lowercase() == lowered)
            .cloned()
        else {
            return Flow::Continue;
        };
        if let Some(player) = self.session.roster.get(&seat_name) {
            send_message_to_websocket(
                &player.tx,
                &ServerMessage::PlayerRemoved {
                    name: seat_name.clone(),
                    banned: true,
                },
                "ban notice",
            );
            let _ = player.tx.send(Message::Close(None));
        }
        info!(room = self.session.code, player = %seat_name, "player banned");
        self.remove_active_player(&seat_name, true)
    }

    fn on_mark_refresh(&mut self, conn: ConnId) {
        if self.session.is_organizer_conn(conn) {
            if let Some(organizer) = self.session.organizer.as_mut() {
                organizer.pending_refresh = true;
            }
        } else if let Some(name) = self.session.player_name_by_conn(conn) {
            if let Some(player) = self.session.roster.get_mut(&name) {
                player.pending_refresh = true;
            }
        }
    }

    // ---- game flow --------------------------------------------------------

    fn on_start_game(&mut self, seconds: Option<u32>) {
        if self.session.machine.phase() != SessionPhase::Waiting {
            warn!(room = self.session.code, "game countdown ignored outside waiting phase");
            return;
        }
        if self.session.roster.is_empty() && !self.session.random_mode {
            self.send_organizer(&ServerMessage::ErrorNotice {
                message: "cannot start a game without players".into(),
            });
            return;
        }

        // The room stops accepting joins once the countdown is running.
        if !self.session.locked {
            self.session.locked = true;
            self.broadcast(&ServerMessage::LockChanged { locked: true });
            lobby_service::broadcast_lock_changed(&self.state, self.session.code, true);
        }

        self.session.started_at = Some(SystemTime::now());
        let seconds = seconds.unwrap_or(self.state.config().default_start_countdown_secs);
        self.timer_purpose = TimerPurpose::PreGame;
        self.countdown.start(seconds, self.tx.clone());
        self.broadcast(&ServerMessage::Tick { remaining: seconds });
        info!(room = self.session.code, seconds, "pre-game countdown started");
    }

    fn on_start_question_countdown(&mut self) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::QuestionActive)
            || !self.session.question_issued
        {
            warn!(room = self.session.code, "question countdown ignored in current phase");
            return;
        }
        let duration = self.session.quiz.duration_for(self.session.current_index);
        self.timer_purpose = TimerPurpose::Question;
        self.countdown.start(duration, self.tx.clone());
        self.broadcast(&ServerMessage::Tick {
            remaining: duration,
        });
    }

    fn on_question_end_by_timer(&mut self) {
        if self.session.machine.phase() == SessionPhase::Gaming(GamingPhase::QuestionActive) {
            self.end_question();
        }
    }

    fn on_tick(&mut self, generation: u64) -> Flow {
        match self.countdown.on_tick(generation) {
            TickOutcome::Stale => Flow::Continue,
            TickOutcome::Running(remaining) => {
                self.broadcast(&ServerMessage::Tick { remaining });
                if self.timer_purpose == TimerPurpose::Question
                    && remaining <= self.state.config().alert_threshold_secs
                {
                    self.enter_alert_mode();
                }
                Flow::Continue
            }
            TickOutcome::Elapsed => {
                self.broadcast(&ServerMessage::Tick { remaining: 0 });
                self.on_countdown_elapsed()
            }
        }
    }

    fn on_countdown_elapsed(&mut self) -> Flow {
        match self.timer_purpose {
            TimerPurpose::PreGame => {
                if let Err(err) = self.session.machine.apply(SessionEvent::CountdownElapsed) {
                    warn!(room = self.session.code, error = %err, "spurious pre-game expiry");
                    return Flow::Continue;
                }
                self.broadcast(&ServerMessage::GameStarting {
                    title: self.session.quiz.title.clone(),
                });
                info!(room = self.session.code, "game started");
                self.maybe_issue_question();
                Flow::Continue
            }
            TimerPurpose::Question => {
                if self.session.machine.phase()
                    == SessionPhase::Gaming(GamingPhase::QuestionActive)
                {
                    self.end_question();
                }
                Flow::Continue
            }
        }
    }

    /// Issue the current question once the game is running and everyone who
    /// should be on the in-game view has arrived.
    fn maybe_issue_question(&mut self) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::QuestionActive)
            || self.session.question_issued
        {
            return;
        }
        let organizer_ready = self.session.random_mode
            || self
                .session
                .organizer
                .as_ref()
                .is_some_and(|organizer| organizer.in_game);
        // Random mode may run with an empty roster; otherwise at least one
        // seated player must have reached the in-game view.
        let players_ready = self.session.roster.values().all(|player| player.in_game)
            && (self.session.random_mode || !self.session.roster.is_empty());
        if organizer_ready && players_ready {
            self.issue_question();
        }
    }

    fn issue_question(&mut self) {
        let Some(view) = self.session.quiz.view_of(self.session.current_index) else {
            warn!(
                room = self.session.code,
                index = self.session.current_index,
                "no question at current index"
            );
            return;
        };
        self.session.question_issued = true;
        self.broadcast(&ServerMessage::Question { question: view });
        let duration = self.session.quiz.duration_for(self.session.current_index);
        self.timer_purpose = TimerPurpose::Question;
        self.countdown.start(duration, self.tx.clone());
    }

    // ---- answers ----------------------------------------------------------

    fn on_update_selection(&mut self, conn: ConnId, selected: Vec<usize>, interacting: bool) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::QuestionActive) {
            return;
        }
        let Some(name) = self.session.player_name_by_conn(conn) else {
            return;
        };
        self.session.answers.update_selection(&name, selected);
        if let Some(player) = self.session.roster.get_mut(&name) {
            player.interacting = interacting;
        }
        let choice_count = self
            .session
            .quiz
            .questions
            .get(self.session.current_index)
            .map(|question| question.choice_count())
            .unwrap_or(0);
        let counts = self.session.answers.tally(choice_count);
        self.send_organizer(&ServerMessage::SelectionTally { counts });
        self.send_organizer(&ServerMessage::PlayerInteracting { name, interacting });
    }

    fn on_finalize(&mut self, conn: ConnId, answer: FinalAnswer) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::QuestionActive) {
            return;
        }
        let Some(name) = self.session.player_name_by_conn(conn) else {
            return;
        };
        if !self.session.answers.finalize(&name, answer) {
            return;
        }
        if let Some(player) = self.session.roster.get_mut(&name) {
            player.submitted = true;
            player.interacting = false;
        }
        self.send_organizer(&ServerMessage::PlayerSubmitted { name });
        if self.session.all_present_submitted() {
            self.end_question();
        }
    }

    fn on_free_text(&mut self, conn: ConnId, text: String) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::QuestionActive) {
            return;
        }
        let Some(name) = self.session.player_name_by_conn(conn) else {
            return;
        };
        if !self.session.answers.submit_free_text(&name, text) {
            return;
        }
        if let Some(player) = self.session.roster.get_mut(&name) {
            player.submitted = true;
            player.interacting = false;
        }
        self.send_organizer(&ServerMessage::PlayerSubmitted { name });
        if self.session.all_present_submitted() {
            self.end_question();
        }
    }

    /// Close the current question: stop the clock, then either auto-score or
    /// open the organizer-driven grading flow.
    fn end_question(&mut self) {
        self.countdown.stop();
        let Some(question) = self
            .session
            .quiz
            .questions
            .get(self.session.current_index)
            .cloned()
        else {
            return;
        };

        if question.needs_manual_grading() {
            if let Err(err) = self.session.machine.apply(SessionEvent::QuestionEnded {
                manual_grading: true,
            }) {
                warn!(room = self.session.code, error = %err, "question end rejected");
                return;
            }
            self.session.answers.freeze_for_grading();
            if self.session.answers.pending_count() == 0 {
                // Nobody answered: nothing to grade, finish the question directly.
                if let Err(err) = self.session.machine.apply(SessionEvent::GradingComplete) {
                    warn!(room = self.session.code, error = %err, "empty grading close rejected");
                    return;
                }
                self.finalize_question(Vec::new(), GradeTally::default());
            } else {
                self.send_pending_head();
            }
            return;
        }

        if let Err(err) = self.session.machine.apply(SessionEvent::QuestionEnded {
            manual_grading: false,
        }) {
            warn!(room = self.session.code, error = %err, "question end rejected");
            return;
        }

        // Auto-scoring: exact-match of the committed answer against the key.
        let mut correctness = Vec::new();
        for (name, player) in self.session.roster.iter_mut() {
            let correct = self
                .session
                .answers
                .final_answer(name)
                .map(|answer| is_correct(answer, &question.kind))
                .unwrap_or(false);
            correctness.push((name.clone(), correct));
            if correct {
                player.points += question.points;
                self.gains.insert(name.clone(), question.points);
            }
        }
        self.finalize_question(correctness, GradeTally::default());
    }

    fn on_grade(&mut self, grade: Grade) {
        if self.session.machine.phase() != SessionPhase::Gaming(GamingPhase::Correcting) {
            warn!(room = self.session.code, "grade ignored outside correcting phase");
            return;
        }
        let Some(graded) = self.session.answers.grade_head(grade) else {
            // Empty queue: refuse without corrupting state.
            warn!(room = self.session.code, "grade received with an empty queue");
            return;
        };

        let points = self
            .session
            .quiz
            .questions
            .get(self.session.current_index)
            .map(|question| question.points)
            .unwrap_or(0);
        let award = points * grade.percent() / 100;
        if award > 0 {
            if let Some(player) = self.session.roster.get_mut(&graded.player) {
                player.points += award;
                self.gains.insert(graded.player.clone(), award);
            }
        }

        if self.session.answers.pending_count() > 0 {
            self.send_pending_head();
            return;
        }

        if let Err(err) = self.session.machine.apply(SessionEvent::GradingComplete) {
            warn!(room = self.session.code, error = %err, "grading close rejected");
            return;
        }
        let grade_counts = self.session.answers.grade_counts();
        self.finalize_question(Vec::new(), grade_counts);
    }

    fn send_pending_head(&self) {
        if let Some(head) = self.session.answers.head() {
            self.send_organizer(&ServerMessage::PendingAnswer {
                player: head.player.clone(),
                text: head.text.clone(),
                left: self.session.answers.pending_count(),
            });
        }
    }

    /// Broadcast the scored question and flag the end of the quiz when this
    /// was the last one.
    fn finalize_question(&mut self, correctness: Vec<(String, bool)>, grade_counts: GradeTally) {
        let game_finished = self.session.on_last_question();
        if game_finished {
            if let Err(err) = self.session.machine.apply(SessionEvent::LastQuestionDone) {
                warn!(room = self.session.code, error = %err, "last-question flag rejected");
            }
        }

        let deltas: Vec<PointDelta> = self
            .session
            .roster
            .iter()
            .map(|(name, player)| PointDelta {
                name: name.clone(),
                gained: self.gains.get(name).copied().unwrap_or(0),
                total: player.points,
            })
            .collect();

        self.broadcast(&ServerMessage::QuestionResults {
            deltas,
            grade_counts,
            correctness,
            game_finished,
        });
    }

    fn on_next_question(&mut self) {
        if let Err(err) = self.session.machine.apply(SessionEvent::NextQuestion) {
            warn!(room = self.session.code, error = %err, "next question rejected");
            return;
        }
        self.session.current_index += 1;
        self.session.answers.reset();
        self.session.reset_question_flags();
        self.gains.clear();
        self.countdown.stop();
        self.issue_question();
    }

    fn on_show_results(&mut self) {
        // Results are broadcast and persisted exactly once.
        if self.session.results_shown {
            return;
        }
        if let Err(err) = self.session.machine.apply(SessionEvent::ResultsShown) {
            warn!(room = self.session.code, error = %err, "show results rejected");
            return;
        }
        self.session.results_shown = true;
        self.countdown.stop();

        let ranking = self.session.ranking();
        self.broadcast(&ServerMessage::Results {
            ranking: ranking.clone(),
        });

        let record = GameRecord {
            session_name: self.session.quiz.title.clone(),
            start_date: format_system_time(
                self.session.started_at.unwrap_or_else(SystemTime::now),
            ),
            player_count: ranking.len(),
            best_score: ranking.first().map(|row| row.points).unwrap_or(0),
            ranked_results: ranking,
        };
        let store = self.state.records();
        let room = self.session.code;
        tokio::spawn(async move {
            if let Err(err) = store.save(record).await {
                warn!(room, error = %err, "failed to persist game record");
            }
        });
        info!(room = self.session.code, "results shown");
    }

    // ---- timer modifiers --------------------------------------------------

    fn on_toggle_pause(&mut self) {
        if !self.session.machine.is_gaming() {
            warn!(room = self.session.code, "pause ignored outside gaming phase");
            return;
        }
        if self.countdown.is_paused() {
            self.countdown.resume(self.tx.clone());
            self.broadcast(&ServerMessage::PauseChanged { paused: false });
        } else if self.countdown.is_running() {
            self.countdown.pause();
            self.broadcast(&ServerMessage::PauseChanged { paused: true });
        }
    }

    fn on_start_alert(&mut self) {
        if !self.session.machine.is_gaming() {
            warn!(room = self.session.code, "alert ignored outside gaming phase");
            return;
        }
        self.enter_alert_mode();
    }

    fn enter_alert_mode(&mut self) {
        if self.countdown.enter_alert(self.tx.clone()) {
            self.broadcast(&ServerMessage::AlertStarted);
        }
    }

    // ---- connection lifecycle ---------------------------------------------

    fn on_disconnected(&mut self, conn: ConnId) -> Flow {
        self.state.registry().unbind(conn);

        if self.session.is_organizer_conn(conn) {
            return self.on_organizer_disconnected();
        }

        let Some(name) = self.session.player_name_by_conn(conn) else {
            return Flow::Continue;
        };

        // A refresh marker parks the seat instead of cascading.
        // The marker stays set while the seat is parked; reattaching under the
        // same name consumes it. Once the ranking is on screen there is nothing
        // left to reclaim, so a disconnect there is a plain departure.
        if self.session.machine.phase() != SessionPhase::Results {
            if let Some(player) = self.session.roster.get_mut(&name) {
                if player.pending_refresh {
                    player.in_game = false;
                    info!(room = self.session.code, player = %name, "refresh marker honored");
                    return Flow::Continue;
                }
            }
        }

        info!(room = self.session.code, player = %name, "player disconnected");
        self.remove_active_player(&name, false)
    }

    fn on_organizer_disconnected(&mut self) -> Flow {
        if let Some(organizer) = self.session.organizer.as_mut() {
            if organizer.pending_refresh {
                organizer.pending_refresh = false;
                organizer.in_game = false;
                info!(room = self.session.code, "organizer refresh marker honored");
                return Flow::Continue;
            }
        }

        if self.session.machine.phase() == SessionPhase::Results {
            self.session.organizer = None;
            self.broadcast(&ServerMessage::SystemNotice {
                message: "The organizer left the results page".into(),
            });
            return self.destroy_if_results_empty();
        }

        info!(room = self.session.code, "organizer disconnected, tearing session down");
        self.teardown(EndReason::OrganizerLeft)
    }

    /// Remove a player from the roster and run the state-dependent cascade.
    fn remove_active_player(&mut self, name: &str, banned: bool) -> Flow {
        let Some(player) = self.session.roster.shift_remove(name) else {
            return Flow::Continue;
        };
        self.state.registry().unbind(player.conn);
        self.session.answers.forget_player(name);

        match self.session.machine.phase() {
            SessionPhase::Waiting => {
                self.broadcast(&ServerMessage::PlayerRemoved {
                    name: name.to_string(),
                    banned,
                });
                self.broadcast_roster();
                Flow::Continue
            }
            SessionPhase::Gaming(gaming) => {
                self.session
                    .removed_in_game
                    .push((name.to_string(), player.points));
                self.broadcast(&ServerMessage::PlayerRemoved {
                    name: name.to_string(),
                    banned,
                });
                self.broadcast_roster();

                if self.session.roster.is_empty() && !self.session.random_mode {
                    info!(room = self.session.code, "last player left mid-game");
                    return self.teardown(EndReason::AllPlayersLeft);
                }
                if gaming == GamingPhase::QuestionActive && self.session.all_present_submitted() {
                    self.end_question();
                }
                Flow::Continue
            }
            SessionPhase::Results => {
                self.broadcast(&ServerMessage::SystemNotice {
                    message: format!("{name} left the results page"),
                });
                self.destroy_if_results_empty()
            }
        }
    }

    fn destroy_if_results_empty(&mut self) -> Flow {
        // Seats parked by a refresh marker have no live connection behind
        // them; they must not keep a finished room alive.
        let live_players = self
            .session
            .roster
            .values()
            .any(|player| !player.pending_refresh);
        if !live_players && self.session.organizer.is_none() {
            return self.silent_destroy();
        }
        Flow::Continue
    }

    /// Force-end the session for everyone still connected.
    fn teardown(&mut self, reason: EndReason) -> Flow {
        self.countdown.stop();
        self.broadcast(&ServerMessage::SessionEnded { reason });
        for player in self.session.roster.values() {
            let _ = player.tx.send(Message::Close(None));
            self.state.registry().unbind(player.conn);
        }
        if let Some(organizer) = &self.session.organizer {
            let _ = organizer.tx.send(Message::Close(None));
            self.state.registry().unbind(organizer.conn);
        }
        self.session.roster.clear();
        self.finish_destroy()
    }

    /// Remove the room without notifying anyone; used once nobody remains.
    fn silent_destroy(&mut self) -> Flow {
        self.countdown.stop();
        for player in self.session.roster.values() {
            self.state.registry().unbind(player.conn);
        }
        if let Some(organizer) = &self.session.organizer {
            self.state.registry().unbind(organizer.conn);
        }
        self.finish_destroy()
    }

    fn finish_destroy(&mut self) -> Flow {
        self.state.registry().remove(self.session.code);
        lobby_service::broadcast_session_deleted(&self.state, self.session.code);
        info!(room = self.session.code, "session destroyed");
        Flow::Stop
    }

    // ---- outbound ---------------------------------------------------------

    fn broadcast(&self, message: &ServerMessage) {
        for player in self.session.roster.values() {
            send_message_to_websocket(&player.tx, message, "room broadcast");
        }
        if let Some(organizer) = &self.session.organizer {
            send_message_to_websocket(&organizer.tx, message, "room broadcast");
        }
    }

    fn send_organizer(&self, message: &ServerMessage) {
        if let Some(organizer) = &self.session.organizer {
            send_message_to_websocket(&organizer.tx, message, "organizer notification");
        }
    }

    fn broadcast_roster(&self) {
        self.broadcast(&ServerMessage::RosterUpdate {
            players: self.session.roster_summaries(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;
    use crate::state::AppState;
    use crate::state::game::{Choice, Question, QuestionKind};

    fn choice_quiz() -> Quiz {
        Quiz {
            title: "Capitals".into(),
            duration_secs: 30,
            questions: vec![Question {
                text: "Capital of France?".into(),
                points: 10,
                kind: QuestionKind::Choice(vec![
                    Choice {
                        text: "Lyon".into(),
                        is_correct: false,
                    },
                    Choice {
                        text: "Paris".into(),
                        is_correct: true,
                    },
                    Choice {
                        text: "Marseille".into(),
                        is_correct: false,
                    },
                ]),
            }],
        }
    }

    fn free_text_quiz() -> Quiz {
        Quiz {
            title: "Essays".into(),
            duration_secs: 30,
            questions: vec![Question {
                text: "Explain gravity.".into(),
                points: 20,
                kind: QuestionKind::FreeText,
            }],
        }
    }

    async fn join(
        handle: &SessionHandle,
        name: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<Message>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::Join {
                name: name.into(),
                conn,
                tx,
                reply: reply_tx,
            })
            .unwrap();
        reply_rx.await.unwrap().unwrap();
        (conn, rx)
    }

    /// Pull frames until one of the wanted type arrives.
    async fn next_of_type(rx: &mut mpsc::UnboundedReceiver<Message>, wanted: &str) -> Value {
        timeout(Duration::from_secs(120), async {
            loop {
                if let Message::Text(text) = rx.recv().await.expect("channel closed") {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == wanted {
                        return value;
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for `{wanted}`"))
    }

    fn drain_count(rx: &mut mpsc::UnboundedReceiver<Message>, wanted: &str) -> usize {
        let mut count = 0;
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == wanted {
                    count += 1;
                }
            }
        }
        count
    }

    /// Wait until the actor processed everything sent so far.
    async fn barrier(handle: &SessionHandle) {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::QueryLock { reply: reply_tx })
            .unwrap();
        let _ = reply_rx.await;
    }

    #[tokio::test(start_paused = true)]
    async fn plays_a_single_choice_question_through_to_results() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();

        let (ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::Connected { conn: org_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Connected { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();

        next_of_type(&mut ana_rx, "game_starting").await;
        let question = next_of_type(&mut ana_rx, "question").await;
        let choices = question["question"]["choices"].as_array().unwrap();
        assert_eq!(choices.len(), 3);
        // Players only ever see choice texts, never correctness flags.
        assert_eq!(choices[1], "Paris");

        handle
            .tx
            .send(SessionCommand::FinalizeAnswer {
                conn: ana_conn,
                answer: FinalAnswer::Selections(vec![1]),
            })
            .unwrap();

        let results = next_of_type(&mut ana_rx, "question_results").await;
        assert_eq!(results["game_finished"], true);
        assert_eq!(results["deltas"][0]["name"], "Ana");
        assert_eq!(results["deltas"][0]["gained"], 10);
        assert_eq!(results["deltas"][0]["total"], 10);

        handle.tx.send(SessionCommand::ShowResults).unwrap();
        let ranking = next_of_type(&mut org_rx, "results").await;
        assert_eq!(ranking["ranking"][0]["name"], "Ana");
        assert_eq!(ranking["ranking"][0]["winner"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn organizer_disconnect_ends_the_session_for_players() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, _org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();
        let code = handle.code;

        let (_ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::Disconnected { conn: org_conn })
            .unwrap();

        let ended = next_of_type(&mut ana_rx, "session_ended").await;
        assert_eq!(ended["reason"], "organizer_left");
        assert!(state.registry().lookup(code).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn last_player_leaving_mid_game_ends_the_session() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();
        let code = handle.code;

        let (ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::Connected { conn: org_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Connected { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();
        next_of_type(&mut ana_rx, "question").await;

        handle
            .tx
            .send(SessionCommand::Disconnected { conn: ana_conn })
            .unwrap();

        let ended = next_of_type(&mut org_rx, "session_ended").await;
        assert_eq!(ended["reason"], "all_players_left");
        assert!(state.registry().lookup(code).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn free_text_grading_runs_alphabetically_and_awards_multipliers() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, free_text_quiz(), (org_conn, org_tx), false).unwrap();

        let (ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        let (bob_conn, _bob_rx) = join(&handle, "Bob").await;
        for conn in [org_conn, ana_conn, bob_conn] {
            handle.tx.send(SessionCommand::Connected { conn }).unwrap();
        }
        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();
        next_of_type(&mut ana_rx, "question").await;

        // Bob answers first, yet Ana is graded first once the queue freezes.
        handle
            .tx
            .send(SessionCommand::FreeTextSubmitted {
                conn: bob_conn,
                text: "it pulls".into(),
            })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::FreeTextSubmitted {
                conn: ana_conn,
                text: "masses attract".into(),
            })
            .unwrap();

        let head = next_of_type(&mut org_rx, "pending_answer").await;
        assert_eq!(head["player"], "Ana");
        assert_eq!(head["left"], 2);

        handle
            .tx
            .send(SessionCommand::GradeAnswer {
                grade: Grade::Partial,
            })
            .unwrap();
        let head = next_of_type(&mut org_rx, "pending_answer").await;
        assert_eq!(head["player"], "Bob");
        assert_eq!(head["left"], 1);

        handle
            .tx
            .send(SessionCommand::GradeAnswer {
                grade: Grade::Correct,
            })
            .unwrap();
        let results = next_of_type(&mut org_rx, "question_results").await;
        assert_eq!(results["game_finished"], true);
        assert_eq!(results["grade_counts"]["partial"], 1);
        assert_eq!(results["grade_counts"]["correct"], 1);
        assert_eq!(results["deltas"][0]["name"], "Ana");
        assert_eq!(results["deltas"][0]["gained"], 10);
        assert_eq!(results["deltas"][1]["name"], "Bob");
        assert_eq!(results["deltas"][1]["gained"], 20);
    }

    #[tokio::test(start_paused = true)]
    async fn show_results_broadcasts_and_persists_exactly_once() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();

        let (ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::Connected { conn: org_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Connected { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();
        next_of_type(&mut ana_rx, "question").await;
        handle
            .tx
            .send(SessionCommand::FinalizeAnswer {
                conn: ana_conn,
                answer: FinalAnswer::Selections(vec![1]),
            })
            .unwrap();
        next_of_type(&mut ana_rx, "question_results").await;

        handle.tx.send(SessionCommand::ShowResults).unwrap();
        next_of_type(&mut org_rx, "results").await;
        handle.tx.send(SessionCommand::ShowResults).unwrap();
        barrier(&handle).await;
        // Let the spawned record save run before checking the store.
        tokio::task::yield_now().await;

        assert_eq!(drain_count(&mut org_rx, "results"), 0);
        let records = state.records().list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].best_score, 10);
        assert_eq!(records[0].player_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_marker_parks_the_seat_instead_of_removing_it() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, _org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();

        let (ana_conn, _ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::MarkRefresh { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Disconnected { conn: ana_conn })
            .unwrap();
        barrier(&handle).await;

        // The seat survived; rejoining under the same name reclaims it.
        let (_new_conn, mut new_rx) = join(&handle, "Ana").await;
        let confirmation = next_of_type(&mut new_rx, "can_join").await;
        assert_eq!(confirmation["name"], "Ana");
    }

    #[tokio::test(start_paused = true)]
    async fn random_mode_runs_without_any_players() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(&state, choice_quiz(), (org_conn, org_tx), true).unwrap();

        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();

        next_of_type(&mut org_rx, "game_starting").await;
        let question = next_of_type(&mut org_rx, "question").await;
        assert_eq!(question["question"]["choices"].as_array().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_session_is_destroyed_despite_a_parked_seat() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, mut org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();
        let code = handle.code;

        let (ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::Connected { conn: org_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Connected { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::StartGameCountdown { seconds: Some(1) })
            .unwrap();
        next_of_type(&mut ana_rx, "question").await;

        // Ana refreshes mid-game and never comes back.
        handle
            .tx
            .send(SessionCommand::MarkRefresh { conn: ana_conn })
            .unwrap();
        handle
            .tx
            .send(SessionCommand::Disconnected { conn: ana_conn })
            .unwrap();

        handle.tx.send(SessionCommand::QuestionEndByTimer).unwrap();
        next_of_type(&mut org_rx, "question_results").await;
        handle.tx.send(SessionCommand::ShowResults).unwrap();
        next_of_type(&mut org_rx, "results").await;

        handle
            .tx
            .send(SessionCommand::Disconnected { conn: org_conn })
            .unwrap();
        // The actor winds down once the organizer leaves the results page;
        // the parked seat must not keep the room alive.
        timeout(Duration::from_secs(120), async {
            while org_rx.recv().await.is_some() {}
        })
        .await
        .expect("session was not destroyed");
        assert!(state.registry().lookup(code).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ban_resolves_seats_case_insensitively() {
        let state = AppState::new();
        let org_conn = Uuid::new_v4();
        let (org_tx, _org_rx) = mpsc::unbounded_channel();
        let handle =
            spawn_session(&state, choice_quiz(), (org_conn, org_tx), false).unwrap();

        let (_ana_conn, mut ana_rx) = join(&handle, "Ana").await;
        handle
            .tx
            .send(SessionCommand::BanPlayer { name: "ana".into() })
            .unwrap();

        let removed = next_of_type(&mut ana_rx, "player_removed").await;
        assert_eq!(removed["name"], "Ana");
        assert_eq!(removed["banned"], true);

        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::Join {
                name: "Ana".into(),
                conn,
                tx,
                reply: reply_tx,
            })
            .unwrap();
        assert_eq!(reply_rx.await.unwrap(), Err(JoinRefusal::BannedName));
    }
}
