//! Words awaiting human boundary confirmation for the current cycle.

use std::collections::HashSet;

use tracing::debug;

use crate::gold::GoldReference;
use crate::model::AnnotationWord;

/// The current cycle's review queue and per-word confirmation flags.
///
/// A word is confirmed once the user has explicitly accepted its boundaries
/// this cycle. Editing boundaries does not confirm a word.
#[derive(Debug, Default, Clone)]
pub struct AnnotationState {
    words: Vec<AnnotationWord>,
    confirmed: HashSet<String>,
}

impl AnnotationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with a new cycle's samples; clears confirmations.
    pub fn replace_word_list(&mut self, words: Vec<AnnotationWord>) {
        self.words = words;
        self.confirmed.clear();
    }

    /// Restore a queue together with previously persisted confirmation flags.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = (AnnotationWord, bool)>) {
        self.reset();
        for (word, confirmed) in entries {
            if confirmed {
                self.confirmed.insert(word.id.clone());
            }
            self.words.push(word);
        }
    }

    /// Replace a word's boundary set. Unknown ids are ignored; returns whether
    /// a word was updated.
    pub fn update_boundaries(
        &mut self,
        word_id: &str,
        boundaries: impl IntoIterator<Item = usize>,
    ) -> bool {
        match self.words.iter_mut().find(|w| w.id == word_id) {
            Some(word) => {
                word.set_boundaries(boundaries);
                true
            }
            None => {
                debug!(word_id, "boundary update for unknown word ignored");
                false
            }
        }
    }

    /// Mark a word as confirmed. Unknown ids are ignored.
    pub fn confirm(&mut self, word_id: &str) -> bool {
        if self.words.iter().any(|w| w.id == word_id) {
            self.confirmed.insert(word_id.to_string());
            true
        } else {
            false
        }
    }

    /// Withdraw a confirmation.
    pub fn unconfirm(&mut self, word_id: &str) -> bool {
        self.confirmed.remove(word_id)
    }

    pub fn confirm_all(&mut self) {
        self.confirmed = self.words.iter().map(|w| w.id.clone()).collect();
    }

    pub fn is_confirmed(&self, word_id: &str) -> bool {
        self.confirmed.contains(word_id)
    }

    pub fn confirmed_count(&self) -> usize {
        self.words
            .iter()
            .filter(|w| self.confirmed.contains(&w.id))
            .count()
    }

    /// True iff every queued word is confirmed and the queue is non-empty.
    pub fn all_confirmed(&self) -> bool {
        !self.words.is_empty() && self.confirmed_count() == self.words.len()
    }

    pub fn words(&self) -> &[AnnotationWord] {
        &self.words
    }

    pub fn word(&self, word_id: &str) -> Option<&AnnotationWord> {
        self.words.iter().find(|w| w.id == word_id)
    }

    /// Confirmed words in queue order.
    pub fn confirmed_words(&self) -> impl Iterator<Item = &AnnotationWord> {
        self.words
            .iter()
            .filter(|w| self.confirmed.contains(&w.id))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn reset(&mut self) {
        self.words.clear();
        self.confirmed.clear();
    }

    /// Fill boundaries from a gold reference for every queued word it knows,
    /// confirming those words. Returns the ids that were filled.
    pub fn autofill_from_gold(&mut self, gold: &GoldReference) -> Vec<String> {
        let mut filled = Vec::new();
        for word in &mut self.words {
            if let Some(boundaries) = gold.boundaries(&word.word) {
                word.set_boundaries(boundaries.iter().copied());
                self.confirmed.insert(word.id.clone());
                filled.push(word.id.clone());
            }
        }
        debug!(filled = filled.len(), total = self.words.len(), "gold auto-fill");
        filled
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn queue() -> AnnotationState {
        let mut state = AnnotationState::new();
        state.replace_word_list(vec![
            AnnotationWord::new("w0", "walked", 0.2),
            AnnotationWord::new("w1", "cats", 0.3),
            AnnotationWord::new("w2", "run", 0.4),
        ]);
        state
    }

    #[test]
    fn empty_queue_is_never_all_confirmed() {
        let state = AnnotationState::new();
        assert!(!state.all_confirmed());
    }

    #[test]
    fn all_confirmed_requires_every_word() {
        let mut state = queue();
        assert!(state.confirm("w0"));
        assert!(state.confirm("w1"));
        assert!(!state.all_confirmed());
        assert!(state.confirm("w2"));
        assert!(state.all_confirmed());
    }

    #[test]
    fn update_unknown_word_is_noop() {
        let mut state = queue();
        let before = state.words().to_vec();
        assert!(!state.update_boundaries("w9", [1]));
        assert_eq!(state.words(), before.as_slice());
    }

    #[test]
    fn update_does_not_confirm() {
        let mut state = queue();
        assert!(state.update_boundaries("w0", [3]));
        assert_eq!(state.word("w0").unwrap().boundaries, BTreeSet::from([3]));
        assert!(!state.is_confirmed("w0"));
    }

    #[test]
    fn replace_resets_confirmation() {
        let mut state = queue();
        state.confirm_all();
        assert!(state.all_confirmed());
        state.replace_word_list(vec![AnnotationWord::new("w0", "dogs", 0.1)]);
        assert_eq!(state.confirmed_count(), 0);
    }

    #[test]
    fn confirm_unknown_word_is_ignored() {
        let mut state = queue();
        assert!(!state.confirm("nope"));
        assert_eq!(state.confirmed_count(), 0);
    }

    #[test]
    fn unconfirm_reopens_word() {
        let mut state = queue();
        state.confirm_all();
        assert!(state.unconfirm("w1"));
        assert!(!state.all_confirmed());
    }

    #[test]
    fn reset_empties_queue() {
        let mut state = queue();
        state.confirm("w0");
        state.reset();
        assert!(state.is_empty());
        assert_eq!(state.confirmed_count(), 0);
    }

    #[test]
    fn restore_keeps_flags() {
        let mut state = AnnotationState::new();
        state.restore(vec![
            (AnnotationWord::new("w0", "walked", 0.2), true),
            (AnnotationWord::new("w1", "cats", 0.3), false),
        ]);
        assert_eq!(state.len(), 2);
        assert!(state.is_confirmed("w0"));
        assert!(!state.is_confirmed("w1"));
    }

    #[test]
    fn confirmed_words_follow_queue_order() {
        let mut state = queue();
        state.confirm("w2");
        state.confirm("w0");
        let ids: Vec<&str> = state.confirmed_words().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, ["w0", "w2"]);
    }

    #[test]
    fn autofill_sets_and_confirms_known_words() {
        let mut state = queue();
        let gold = GoldReference::parse("walk!ed\nc a t ! s\n");
        let filled = state.autofill_from_gold(&gold);
        assert_eq!(filled, ["w0", "w1"]);
        assert_eq!(state.word("w0").unwrap().boundaries, BTreeSet::from([3]));
        assert_eq!(state.word("w1").unwrap().boundaries, BTreeSet::from([2]));
        assert!(state.is_confirmed("w1"));
        assert!(!state.is_confirmed("w2"));
    }
}
