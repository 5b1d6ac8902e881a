//! Thought: a [`State`] plus quality/validity metadata.
//!
//! Every thought carries a creation sequence number handed out by a run-wide [`Sequencer`].
//! Operations use it as the canonical order (tie-breaking, merge order) so results do not
//! depend on which capability call happened to finish first.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::state::{fields, State};

/// One node of the reasoning graph: state plus metadata.
///
/// A thought owns its state exclusively. Operations take thoughts by value, mutate them while
/// they own them, and hand them on; a new thought built from a parent always gets a copied state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Creation order within the run.
    pub seq: u64,
    pub state: State,
    pub score: f64,
    pub valid: bool,
    pub solved: bool,
    pub scored: bool,
    pub validated: bool,
    pub compared_to_ground_truth: bool,
    /// Regenerations spent on this branch by ValidateAndImprove.
    #[serde(default)]
    pub retries: u32,
    /// Why the thought is invalid, when it is.
    #[serde(default)]
    pub error: Option<String>,
}

impl Thought {
    /// Fresh, valid, unscored thought.
    pub fn new(seq: u64, state: State) -> Self {
        Self {
            seq,
            state,
            score: 0.0,
            valid: true,
            solved: false,
            scored: false,
            validated: false,
            compared_to_ground_truth: false,
            retries: 0,
            error: None,
        }
    }

    /// Invalid thought recording `error` both on the thought and in the `error` state field.
    pub fn invalid(seq: u64, mut state: State, error: impl Into<String>) -> Self {
        let error = error.into();
        state.set(fields::ERROR, error.clone());
        Self {
            valid: false,
            error: Some(error),
            ..Self::new(seq, state)
        }
    }

    /// New thought whose state is an independent copy of this one's overlaid with `overlay`.
    ///
    /// Metadata starts fresh; only the retry counter carries over (it belongs to the branch). The
    /// parent's `error` field is not inherited.
    pub fn derive(&self, seq: u64, overlay: &State) -> Thought {
        let mut state = self.state.clone();
        state.remove(fields::ERROR);
        state.merge(overlay.clone());
        Thought {
            retries: self.retries,
            ..Thought::new(seq, state)
        }
    }

    /// Independent copy keeping all metadata, under a new sequence number.
    pub fn duplicate(&self, seq: u64) -> Thought {
        Thought {
            seq,
            ..self.clone()
        }
    }

    /// Score used for ordering: `None` when unscored.
    pub fn ranking_score(&self) -> Option<f64> {
        self.scored.then_some(self.score)
    }
}

/// Run-wide source of thought sequence numbers.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserves `count` consecutive numbers and returns the first.
    pub fn reserve(&self, count: u64) -> u64 {
        self.next.fetch_add(count, Ordering::Relaxed)
    }

    /// Numbers handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Sorts by sequence number and drops later duplicates of the same number.
pub fn canonical_order(mut thoughts: Vec<Thought>) -> Vec<Thought> {
    thoughts.sort_by_key(|t| t.seq);
    thoughts.dedup_by_key(|t| t.seq);
    thoughts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_thought_is_valid_and_unscored() {
        let t = Thought::new(0, State::new());
        assert!(t.valid);
        assert!(!t.scored);
        assert_eq!(t.score, 0.0);
        assert_eq!(t.ranking_score(), None);
    }

    #[test]
    fn invalid_thought_records_error_in_state() {
        let t = Thought::invalid(3, State::new().with("doc", "x"), "timeout");
        assert!(!t.valid);
        assert_eq!(t.error.as_deref(), Some("timeout"));
        assert_eq!(t.state.get_str(fields::ERROR), Some("timeout"));
        assert_eq!(t.state.get_str("doc"), Some("x"));
    }

    #[test]
    fn derive_resets_metadata_and_copies_state() {
        let mut parent = Thought::new(1, State::new().with("list", json!([1])));
        parent.score = 0.9;
        parent.scored = true;
        parent.retries = 2;
        let mut child = parent.derive(5, &State::new().with(fields::PHASE, "merge"));
        child.state.set("list", json!([1, 2]));

        assert_eq!(child.seq, 5);
        assert!(!child.scored);
        assert_eq!(child.retries, 2);
        assert_eq!(parent.state.get("list"), Some(&json!([1])));
        assert!(!parent.state.contains(fields::PHASE));
    }

    #[test]
    fn derive_from_invalid_parent_drops_error() {
        let parent = Thought::invalid(0, State::new().with("doc", "x"), "timeout");
        let child = parent.derive(1, &State::new());
        assert!(child.valid);
        assert!(child.error.is_none());
        assert!(!child.state.contains(fields::ERROR));
        assert_eq!(child.state.get_str("doc"), Some("x"));
    }

    #[test]
    fn duplicate_keeps_metadata() {
        let mut t = Thought::new(1, State::new().with("a", 1));
        t.score = 0.4;
        t.scored = true;
        let mut copy = t.duplicate(9);
        copy.state.set("a", 2);
        assert_eq!(copy.seq, 9);
        assert_eq!(copy.score, 0.4);
        assert!(copy.scored);
        assert_eq!(t.state.get("a"), Some(&json!(1)));
    }

    #[test]
    fn sequencer_reserves_consecutive_ranges() {
        let s = Sequencer::new();
        assert_eq!(s.next(), 0);
        assert_eq!(s.reserve(3), 1);
        assert_eq!(s.next(), 4);
        assert_eq!(s.issued(), 5);
    }

    #[test]
    fn canonical_order_sorts_and_dedups() {
        let ts = vec![
            Thought::new(3, State::new()),
            Thought::new(1, State::new().with("first", true)),
            Thought::new(1, State::new().with("second", true)),
        ];
        let out = canonical_order(ts);
        assert_eq!(out.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert!(out[0].state.contains("first"));
    }
}
