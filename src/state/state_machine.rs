//! Per-session phase machine driving question flow from lobby to final results.

use serde::Serialize;
use thiserror::Error;

/// High-level phases a session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Lobby: players may join, the organizer may lock the room and start the countdown.
    Waiting,
    /// A game is in progress and sits in one of the gameplay sub-phases.
    Gaming(GamingPhase),
    /// Final ranking is displayed; the session lingers until everyone leaves.
    Results,
}

/// Fine-grained phase while a game is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamingPhase {
    /// The current question is open and its countdown is running.
    QuestionActive,
    /// Free-text answers are being graded one at a time by the organizer.
    Correcting,
    /// The question has been scored; the organizer decides when to move on.
    CorrectionFinished,
    /// The last question has been scored; only the results step remains.
    GameFinished,
}

/// Events that can be applied to the session phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The pre-game countdown reached zero.
    CountdownElapsed,
    /// The active question ended, either by timer or because everyone answered.
    QuestionEnded {
        /// True when the question needs organizer-driven grading (free-text).
        manual_grading: bool,
    },
    /// The organizer graded the last pending free-text answer.
    GradingComplete,
    /// The organizer advances to the next question.
    NextQuestion,
    /// The question just scored was the last one of the quiz.
    LastQuestionDone,
    /// The organizer requested the final ranking.
    ResultsShown,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// State machine driving the question flow of one session.
///
/// Events are applied directly: every session runs as a single actor, so
/// transitions are already serialized with the rest of the room's operations.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Waiting,
        }
    }
}

impl SessionStateMachine {
    /// Create a new state machine initialised in the waiting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True while the session is in any gameplay sub-phase.
    pub fn is_gaming(&self) -> bool {
        matches!(self.phase, SessionPhase::Gaming(_))
    }

    /// Apply an event, moving the machine to the next phase.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        use GamingPhase::*;
        use SessionPhase::*;

        let next = match (self.phase, event) {
            (Waiting, SessionEvent::CountdownElapsed) => Gaming(QuestionActive),
            (
                Gaming(QuestionActive),
                SessionEvent::QuestionEnded {
                    manual_grading: true,
                },
            ) => Gaming(Correcting),
            (
                Gaming(QuestionActive),
                SessionEvent::QuestionEnded {
                    manual_grading: false,
                },
            ) => Gaming(CorrectionFinished),
            (Gaming(Correcting), SessionEvent::GradingComplete) => Gaming(CorrectionFinished),
            (Gaming(CorrectionFinished), SessionEvent::NextQuestion) => Gaming(QuestionActive),
            (Gaming(CorrectionFinished), SessionEvent::LastQuestionDone) => Gaming(GameFinished),
            (Gaming(GameFinished), SessionEvent::ResultsShown) => Results,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
