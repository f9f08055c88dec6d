//! Quiz-definition payloads consumed when an organizer creates a session.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::dto::validation::validate_points;

const CHOICE_COUNT_RANGE: std::ops::RangeInclusive<usize> = 2..=4;

/// A quiz definition as submitted by the organizer client.
///
/// The engine freezes a copy of this at session creation; later edits to the
/// authored quiz never affect a running room.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuizInput {
    /// Display title broadcast to the room when the game starts.
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    /// Seconds allotted to each auto-scored question. Free-text questions
    /// always get the fixed grading-friendly duration instead.
    #[serde(default = "default_duration_secs")]
    #[validate(range(min = 10, max = 60, message = "Duration must be 10-60 seconds"))]
    pub duration_secs: u32,
    /// Ordered list of questions; order is the play order.
    #[validate(length(min = 1, message = "A quiz requires at least one question"), nested)]
    pub questions: Vec<QuestionInput>,
}

fn default_duration_secs() -> u32 {
    30
}

/// One question of a quiz definition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_question_shape"))]
pub struct QuestionInput {
    /// The question statement shown to players.
    #[validate(length(min = 1, max = 300, message = "Statement must be 1-300 characters"))]
    pub text: String,
    /// Points awarded for a fully correct answer.
    #[validate(custom(function = "validate_points"))]
    pub points: u32,
    /// Type-specific payload.
    #[serde(flatten)]
    pub kind: QuestionKindInput,
}

/// Type-specific data for a question definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKindInput {
    /// Multiple-choice: auto-scored against the `is_correct` flags.
    Choice {
        /// Fixed list of answer choices.
        choices: Vec<ChoiceInput>,
    },
    /// Free-text: graded manually by the organizer.
    FreeText,
    /// Numeric: auto-scored against a target value within a tolerance.
    Numeric {
        /// Expected value.
        answer: f64,
        /// Accepted absolute deviation from the expected value.
        tolerance: f64,
    },
}

/// One selectable choice of a multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceInput {
    /// Text shown to players.
    pub text: String,
    /// Whether this choice belongs to the correct set. Never forwarded to players.
    pub is_correct: bool,
}

/// Cross-field checks that the derive attributes cannot express.
fn validate_question_shape(question: &QuestionInput) -> Result<(), ValidationError> {
    match &question.kind {
        QuestionKindInput::Choice { choices } => {
            if !CHOICE_COUNT_RANGE.contains(&choices.len()) {
                let mut err = ValidationError::new("choice_count");
                err.message = Some("Choice questions need between 2 and 4 choices".into());
                return Err(err);
            }
            let correct = choices.iter().filter(|c| c.is_correct).count();
            if correct == 0 || correct == choices.len() {
                let mut err = ValidationError::new("choice_correctness");
                err.message =
                    Some("Choice questions need at least one correct and one incorrect choice".into());
                return Err(err);
            }
            if choices.iter().any(|c| c.text.trim().is_empty()) {
                let mut err = ValidationError::new("choice_text");
                err.message = Some("Choice text must not be blank".into());
                return Err(err);
            }
        }
        QuestionKindInput::Numeric { tolerance, .. } => {
            if !tolerance.is_finite() || *tolerance < 0.0 {
                let mut err = ValidationError::new("numeric_tolerance");
                err.message = Some("Tolerance must be a non-negative finite number".into());
                return Err(err);
            }
        }
        QuestionKindInput::FreeText => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(text: &str, is_correct: bool) -> ChoiceInput {
        ChoiceInput {
            text: text.into(),
            is_correct,
        }
    }

    fn valid_quiz() -> QuizInput {
        QuizInput {
            title: "Capitals".into(),
            duration_secs: 30,
            questions: vec![QuestionInput {
                text: "Capital of Peru?".into(),
                points: 10,
                kind: QuestionKindInput::Choice {
                    choices: vec![choice("Lima", true), choice("Quito", false)],
                },
            }],
        }
    }

    #[test]
    fn accepts_a_well_formed_quiz() {
        assert!(valid_quiz().validate().is_ok());
    }

    #[test]
    fn rejects_quiz_without_questions() {
        let mut quiz = valid_quiz();
        quiz.questions.clear();
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn rejects_all_correct_choice_sets() {
        let mut quiz = valid_quiz();
        quiz.questions[0].kind = QuestionKindInput::Choice {
            choices: vec![choice("Lima", true), choice("Quito", true)],
        };
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn rejects_single_choice_questions() {
        let mut quiz = valid_quiz();
        quiz.questions[0].kind = QuestionKindInput::Choice {
            choices: vec![choice("Lima", true)],
        };
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn rejects_negative_numeric_tolerance() {
        let mut quiz = valid_quiz();
        quiz.questions[0].kind = QuestionKindInput::Numeric {
            answer: 42.0,
            tolerance: -1.0,
        };
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn deserializes_tagged_question_kinds() {
        let json = r#"{
            "title": "Mixed",
            "questions": [
                {"text": "Explain.", "points": 20, "kind": "free_text"},
                {"text": "How many?", "points": 10, "kind": "numeric", "answer": 4.0, "tolerance": 0.5}
            ]
        }"#;
        let quiz: QuizInput = serde_json::from_str(json).unwrap();
        assert!(quiz.validate().is_ok());
        assert!(matches!(quiz.questions[0].kind, QuestionKindInput::FreeText));
    }
}
