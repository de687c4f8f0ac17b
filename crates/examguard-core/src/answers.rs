//! Answer store and review flags for one attempt.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::AnswerValue;

/// Answers keyed by question id, plus the set of questions flagged for review.
///
/// Writes are last-write-wins. Counts are always derived from the maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerStore {
    answers: BTreeMap<u32, AnswerValue>,
    flags: BTreeSet<u32>,
}

/// How a question appears in the navigation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Unanswered,
    Answered,
    Flagged,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `question_id`, replacing any previous answer.
    pub fn set_answer(&mut self, question_id: u32, value: AnswerValue) {
        self.answers.insert(question_id, value);
    }

    /// The stored answer, or `None` if the question is unanswered.
    pub fn answer(&self, question_id: u32) -> Option<&AnswerValue> {
        self.answers.get(&question_id)
    }

    /// Flip the review flag and return the new state.
    pub fn toggle_flag(&mut self, question_id: u32) -> bool {
        if self.flags.remove(&question_id) {
            false
        } else {
            self.flags.insert(question_id);
            true
        }
    }

    pub fn is_flagged(&self, question_id: u32) -> bool {
        self.flags.contains(&question_id)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.len()
    }

    /// Flagged question ids in ascending order.
    pub fn flagged(&self) -> Vec<u32> {
        self.flags.iter().copied().collect()
    }

    /// Iterate over stored answers in question order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &AnswerValue)> {
        self.answers.iter().map(|(id, value)| (*id, value))
    }

    /// Grid status of a question. A flag outranks an answer.
    pub fn status(&self, question_id: u32) -> QuestionStatus {
        if self.is_flagged(question_id) {
            QuestionStatus::Flagged
        } else if self.answers.contains_key(&question_id) {
            QuestionStatus::Answered
        } else {
            QuestionStatus::Unanswered
        }
    }

    /// Drop every answer and flag.
    pub fn reset(&mut self) {
        self.answers.clear();
        self.flags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut store = AnswerStore::new();
        for value in [0usize, 3, 1, 2] {
            store.set_answer(1, AnswerValue::Choice(value));
        }
        assert_eq!(store.answer(1), Some(&AnswerValue::Choice(2)));
        assert_eq!(store.answered_count(), 1);

        store.set_answer(1, AnswerValue::Text("changed kind".into()));
        assert_eq!(store.answer(1), Some(&AnswerValue::Text("changed kind".into())));
    }

    #[test]
    fn unanswered_is_none() {
        let store = AnswerStore::new();
        assert!(store.answer(7).is_none());
        assert_eq!(store.status(7), QuestionStatus::Unanswered);
    }

    #[test]
    fn toggle_flag_is_its_own_inverse() {
        let mut store = AnswerStore::new();
        store.toggle_flag(2);
        let before = store.clone();

        assert!(store.toggle_flag(5));
        assert!(!store.toggle_flag(5));
        assert_eq!(store, before);

        assert!(!store.toggle_flag(2));
        assert!(store.toggle_flag(2));
        assert_eq!(store, before);
    }

    #[test]
    fn flags_are_independent_of_answers() {
        let mut store = AnswerStore::new();
        store.set_answer(1, AnswerValue::Choice(0));
        store.toggle_flag(1);
        store.toggle_flag(3);

        assert_eq!(store.answered_count(), 1);
        assert_eq!(store.flagged_count(), 2);
        assert_eq!(store.flagged(), vec![1, 3]);
        assert_eq!(store.status(1), QuestionStatus::Flagged);

        store.toggle_flag(1);
        assert_eq!(store.status(1), QuestionStatus::Answered);
        assert_eq!(store.answer(1), Some(&AnswerValue::Choice(0)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = AnswerStore::new();
        store.set_answer(1, AnswerValue::Choice(0));
        store.toggle_flag(2);
        store.reset();
        assert_eq!(store.answered_count(), 0);
        assert_eq!(store.flagged_count(), 0);
    }
}
