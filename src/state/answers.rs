//! Per-question answer collection: live tallies, final answers, and the grading queue.

use std::collections::HashMap;

use crate::dto::ws::{FinalAnswer, Grade, GradeTally};
use crate::state::game::{Choice, QuestionKind};

/// One free-text answer waiting to be graded.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnswer {
    /// Player who submitted the answer.
    pub player: String,
    /// The submitted text.
    pub text: String,
}

/// Transient answer state, reset when a new question begins.
#[derive(Debug, Default)]
pub struct QuestionAnswers {
    /// Working (not yet committed) choice selections per player.
    selections: HashMap<String, Vec<usize>>,
    /// Committed answers per player.
    finalized: HashMap<String, FinalAnswer>,
    /// Free-text answers in submission order until frozen, alphabetical after.
    pending: Vec<PendingAnswer>,
    /// Once grading starts the queue order is fixed and entries are head-only.
    frozen: bool,
    /// Per-grade counts for the current free-text question.
    grade_counts: GradeTally,
}

impl QuestionAnswers {
    /// Drop all per-question state ahead of the next question.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a player's working selection on a choice question.
    pub fn update_selection(&mut self, player: &str, selected: Vec<usize>) {
        self.selections.insert(player.to_string(), selected);
    }

    /// Count, per choice, how many players currently select it.
    ///
    /// Bounded by roster size by construction: one working selection per player.
    pub fn tally(&self, choice_count: usize) -> Vec<usize> {
        let mut counts = vec![0usize; choice_count];
        for selected in self.selections.values() {
            for &index in selected {
                if let Some(slot) = counts.get_mut(index) {
                    *slot += 1;
                }
            }
        }
        counts
    }

    /// Commit a player's final answer. Returns false when they had already committed.
    pub fn finalize(&mut self, player: &str, answer: FinalAnswer) -> bool {
        if self.finalized.contains_key(player) {
            return false;
        }
        self.finalized.insert(player.to_string(), answer);
        true
    }

    /// True once the player has committed an answer for this question.
    pub fn has_finalized(&self, player: &str) -> bool {
        self.finalized.contains_key(player)
    }

    /// Enqueue a free-text answer, overwriting the player's previous entry.
    ///
    /// Submissions arriving after grading started are dropped: only the head
    /// of the frozen queue is ever mutable.
    pub fn submit_free_text(&mut self, player: &str, text: String) -> bool {
        if self.frozen {
            return false;
        }
        match self.pending.iter_mut().find(|entry| entry.player == player) {
            Some(entry) => entry.text = text,
            None => self.pending.push(PendingAnswer {
                player: player.to_string(),
                text,
            }),
        }
        true
    }

    /// Freeze the pending queue in alphabetical player order for deterministic grading.
    pub fn freeze_for_grading(&mut self) {
        self.pending.sort_by(|a, b| a.player.cmp(&b.player));
        self.frozen = true;
    }

    /// Head of the grading queue, if any answer remains.
    pub fn head(&self) -> Option<&PendingAnswer> {
        self.pending.first()
    }

    /// Answers still waiting for a grade.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Apply a grade to the head answer and pop it.
    ///
    /// Returns the graded answer, or `None` when the queue is empty (a
    /// no-op per the engine's failure semantics).
    pub fn grade_head(&mut self, grade: Grade) -> Option<PendingAnswer> {
        if self.pending.is_empty() {
            return None;
        }
        match grade {
            Grade::Wrong => self.grade_counts.wrong += 1,
            Grade::Partial => self.grade_counts.partial += 1,
            Grade::Correct => self.grade_counts.correct += 1,
        }
        Some(self.pending.remove(0))
    }

    /// Per-grade counts accumulated during this question's grading.
    pub fn grade_counts(&self) -> GradeTally {
        self.grade_counts
    }

    /// Committed answer for a player, if any.
    pub fn final_answer(&self, player: &str) -> Option<&FinalAnswer> {
        self.finalized.get(player)
    }

    /// Remove any state held for a departing player.
    pub fn forget_player(&mut self, player: &str) {
        self.selections.remove(player);
        self.finalized.remove(player);
        if !self.frozen {
            self.pending.retain(|entry| entry.player != player);
        }
    }
}

/// Whether a committed answer exactly matches the question's correct set.
pub fn is_correct(answer: &FinalAnswer, kind: &QuestionKind) -> bool {
    match (answer, kind) {
        (FinalAnswer::Selections(selected), QuestionKind::Choice(choices)) => {
            selection_matches(selected, choices)
        }
        (FinalAnswer::Numeric(value), QuestionKind::Numeric { answer, tolerance }) => {
            (value - answer).abs() <= *tolerance
        }
        _ => false,
    }
}

/// Exact-match of the selected index set against the `is_correct` flags.
fn selection_matches(selected: &[usize], choices: &[Choice]) -> bool {
    choices
        .iter()
        .enumerate()
        .all(|(index, choice)| choice.is_correct == selected.contains(&index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> Vec<Choice> {
        vec![
            Choice {
                text: "A".into(),
                is_correct: false,
            },
            Choice {
                text: "B".into(),
                is_correct: true,
            },
            Choice {
                text: "C".into(),
                is_correct: true,
            },
        ]
    }

    #[test]
    fn tally_counts_working_selections() {
        let mut answers = QuestionAnswers::default();
        answers.update_selection("Ana", vec![0, 1]);
        answers.update_selection("Bob", vec![1]);
        assert_eq!(answers.tally(3), vec![1, 2, 0]);

        answers.update_selection("Ana", vec![2]);
        assert_eq!(answers.tally(3), vec![0, 1, 1]);
    }

    #[test]
    fn tally_ignores_out_of_range_indices() {
        let mut answers = QuestionAnswers::default();
        answers.update_selection("Ana", vec![7]);
        assert_eq!(answers.tally(3), vec![0, 0, 0]);
    }

    #[test]
    fn finalize_is_first_commit_wins() {
        let mut answers = QuestionAnswers::default();
        assert!(answers.finalize("Ana", FinalAnswer::Selections(vec![1])));
        assert!(!answers.finalize("Ana", FinalAnswer::Selections(vec![0])));
        assert!(answers.has_finalized("Ana"));
    }

    #[test]
    fn free_text_overwrites_until_frozen() {
        let mut answers = QuestionAnswers::default();
        assert!(answers.submit_free_text("Bob", "draft".into()));
        assert!(answers.submit_free_text("Bob", "final".into()));
        assert_eq!(answers.pending_count(), 1);
        assert_eq!(answers.head().unwrap().text, "final");

        answers.freeze_for_grading();
        assert!(!answers.submit_free_text("Bob", "too late".into()));
    }

    #[test]
    fn grading_order_is_alphabetical_regardless_of_submission() {
        let mut answers = QuestionAnswers::default();
        answers.submit_free_text("Bob", "first in".into());
        answers.submit_free_text("Ana", "second in".into());
        answers.freeze_for_grading();

        assert_eq!(answers.grade_head(Grade::Correct).unwrap().player, "Ana");
        assert_eq!(answers.grade_head(Grade::Wrong).unwrap().player, "Bob");
        assert_eq!(
            answers.grade_counts(),
            GradeTally {
                wrong: 1,
                partial: 0,
                correct: 1
            }
        );
    }

    #[test]
    fn grading_an_empty_queue_is_a_noop() {
        let mut answers = QuestionAnswers::default();
        answers.freeze_for_grading();
        assert!(answers.grade_head(Grade::Correct).is_none());
        assert_eq!(answers.grade_counts(), GradeTally::default());
    }

    #[test]
    fn exact_set_match_scores_choice_answers() {
        let kind = QuestionKind::Choice(choices());
        assert!(is_correct(&FinalAnswer::Selections(vec![1, 2]), &kind));
        assert!(is_correct(&FinalAnswer::Selections(vec![2, 1]), &kind));
        assert!(!is_correct(&FinalAnswer::Selections(vec![1]), &kind));
        assert!(!is_correct(&FinalAnswer::Selections(vec![0, 1, 2]), &kind));
        assert!(!is_correct(&FinalAnswer::Selections(vec![]), &kind));
    }

    #[test]
    fn numeric_answers_match_within_tolerance() {
        let kind = QuestionKind::Numeric {
            answer: 10.0,
            tolerance: 0.5,
        };
        assert!(is_correct(&FinalAnswer::Numeric(10.4), &kind));
        assert!(is_correct(&FinalAnswer::Numeric(9.5), &kind));
        assert!(!is_correct(&FinalAnswer::Numeric(10.6), &kind));
    }

    #[test]
    fn mismatched_answer_shapes_never_score() {
        let kind = QuestionKind::Choice(choices());
        assert!(!is_correct(&FinalAnswer::Numeric(1.0), &kind));
    }

    #[test]
    fn forgetting_a_player_clears_their_traces() {
        let mut answers = QuestionAnswers::default();
        answers.update_selection("Ana", vec![1]);
        answers.finalize("Ana", FinalAnswer::Selections(vec![1]));
        answers.submit_free_text("Ana", "text".into());

        answers.forget_player("Ana");
        assert_eq!(answers.tally(3), vec![0, 0, 0]);
        assert!(!answers.has_finalized("Ana"));
        assert_eq!(answers.pending_count(), 0);
    }
}
