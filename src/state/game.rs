//! Runtime quiz types frozen into a session at creation.

use crate::dto::game::{ChoiceInput, QuestionInput, QuestionKindInput, QuizInput};
use crate::dto::ws::QuestionView;

/// Seconds allotted to every free-text question, independent of the quiz setting.
const FREE_TEXT_DURATION_SECS: u32 = 60;

/// Immutable copy of a quiz taken when the session is created.
#[derive(Debug, Clone)]
pub struct Quiz {
    /// Display title broadcast when the game starts.
    pub title: String,
    /// Countdown length for auto-scored questions.
    pub duration_secs: u32,
    /// Questions in play order.
    pub questions: Vec<Question>,
}

/// One question as consumed by the engine.
#[derive(Debug, Clone)]
pub struct Question {
    /// Statement shown to players.
    pub text: String,
    /// Points awarded for a fully correct answer.
    pub points: u32,
    /// Type-specific payload.
    pub kind: QuestionKind,
}

/// Type-specific question data.
#[derive(Debug, Clone)]
pub enum QuestionKind {
    /// Multiple-choice with a fixed list of choices.
    Choice(Vec<Choice>),
    /// Free-text, graded by the organizer.
    FreeText,
    /// Numeric value matched within a tolerance.
    Numeric {
        /// Expected value.
        answer: f64,
        /// Accepted absolute deviation.
        tolerance: f64,
    },
}

/// One selectable choice with its hidden correctness flag.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Text shown to players.
    pub text: String,
    /// Whether this choice belongs to the correct set.
    pub is_correct: bool,
}

impl Question {
    /// True when the question is graded by the organizer rather than auto-scored.
    pub fn needs_manual_grading(&self) -> bool {
        matches!(self.kind, QuestionKind::FreeText)
    }

    /// Number of choices, zero for non-choice questions.
    pub fn choice_count(&self) -> usize {
        match &self.kind {
            QuestionKind::Choice(choices) => choices.len(),
            _ => 0,
        }
    }
}

impl Quiz {
    /// Countdown length for the question at `index`.
    pub fn duration_for(&self, index: usize) -> u32 {
        match self.questions.get(index).map(|q| &q.kind) {
            Some(QuestionKind::FreeText) => FREE_TEXT_DURATION_SECS,
            _ => self.duration_secs,
        }
    }

    /// Sanitized view of the question at `index`, safe to broadcast.
    pub fn view_of(&self, index: usize) -> Option<QuestionView> {
        let question = self.questions.get(index)?;
        let choices = match &question.kind {
            QuestionKind::Choice(choices) => {
                Some(choices.iter().map(|c| c.text.clone()).collect())
            }
            _ => None,
        };
        Some(QuestionView {
            index,
            total: self.questions.len(),
            text: question.text.clone(),
            points: question.points,
            duration_secs: self.duration_for(index),
            choices,
        })
    }
}

impl From<QuizInput> for Quiz {
    fn from(value: QuizInput) -> Self {
        Self {
            title: value.title,
            duration_secs: value.duration_secs,
            questions: value.questions.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            text: value.text,
            points: value.points,
            kind: value.kind.into(),
        }
    }
}

impl From<QuestionKindInput> for QuestionKind {
    fn from(value: QuestionKindInput) -> Self {
        match value {
            QuestionKindInput::Choice { choices } => {
                QuestionKind::Choice(choices.into_iter().map(Into::into).collect())
            }
            QuestionKindInput::FreeText => QuestionKind::FreeText,
            QuestionKindInput::Numeric { answer, tolerance } => {
                QuestionKind::Numeric { answer, tolerance }
            }
        }
    }
}

impl From<ChoiceInput> for Choice {
    fn from(value: ChoiceInput) -> Self {
        Self {
            text: value.text,
            is_correct: value.is_correct,
        }
    }
}
