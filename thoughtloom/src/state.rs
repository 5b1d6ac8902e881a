//! Thought state: a value-typed map of named fields.
//!
//! A [`State`] owns every value it holds (`serde_json::Value` trees, no `Rc`/`Arc`, no interior
//! mutability), so `clone()` is a full structural copy and two states can never share storage.
//! Operations derive a child state with [`State::derive`], which always copies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known field names read and written by the built-in operations.
///
/// States are schemaless; these names are the conventions operations agree on. Any other field is
/// free-form context for the generation capability.
pub mod fields {
    /// Latest candidate text produced by a generation call.
    pub const CURRENT: &str = "current";
    /// Reference data a scorer compares against.
    pub const GROUND_TRUTH: &str = "ground_truth";
    /// Role/focus label injected by a perspective branch.
    pub const PERSPECTIVE: &str = "perspective";
    /// Prompt-template selector (e.g. `"analysis"`, `"merge"`).
    pub const PHASE: &str = "phase";
    /// Failure description on an invalid thought.
    pub const ERROR: &str = "error";
    /// Reflective context handed to a regeneration attempt.
    pub const FEEDBACK: &str = "feedback";
    /// Candidate label list proposed by a branch.
    pub const CANDIDATES: &str = "candidates";
    /// Free-text reasoning accompanying the candidates.
    pub const RATIONALE: &str = "rationale";
    /// Per-item merge decisions written by Aggregate.
    pub const RESOLUTIONS: &str = "resolutions";
    /// Items Aggregate rejected.
    pub const REJECTED: &str = "rejected";
    /// Detailed scorer output.
    pub const EVALUATION_METRICS: &str = "evaluation_metrics";
    /// Score of the attempt a regeneration is improving on.
    pub const PREVIOUS_SCORE: &str = "previous_score";
}

/// Structured working memory of one reasoning branch.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    fields: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from a JSON object. Returns `None` for any other JSON value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Reads a list of strings. Non-string items are rendered with their JSON text.
    ///
    /// Returns `None` when the field is missing or not a list.
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        let items = self.fields.get(key)?.as_array()?;
        Some(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )
    }

    /// Overwrites fields of `self` with every field of `updates` (top-level keys only).
    pub fn merge(&mut self, updates: State) {
        for (k, v) in updates.fields {
            self.fields.insert(k, v);
        }
    }

    /// Independent copy of `self` with `overlay` merged on top.
    ///
    /// The returned state shares nothing with `self` or `overlay`.
    pub fn derive(&self, overlay: &State) -> State {
        let mut child = self.clone();
        child.merge(overlay.clone());
        child
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for State {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for State {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_accepts_objects_only() {
        assert!(State::from_value(json!({"a": 1})).is_some());
        assert!(State::from_value(json!([1, 2])).is_none());
        assert!(State::from_value(json!("x")).is_none());
    }

    #[test]
    fn derive_overlays_without_touching_parent() {
        let parent = State::new()
            .with(fields::CURRENT, "draft")
            .with("nested", json!({"list": [1, 2]}));
        let overlay = State::new().with(fields::PERSPECTIVE, "user");
        let mut child = parent.derive(&overlay);

        child
            .get_mut("nested")
            .and_then(|v| v.get_mut("list"))
            .and_then(Value::as_array_mut)
            .unwrap()
            .push(json!(3));
        child.set(fields::CURRENT, "rewritten");

        assert_eq!(parent.get_str(fields::CURRENT), Some("draft"));
        assert_eq!(parent.get("nested"), Some(&json!({"list": [1, 2]})));
        assert!(!parent.contains(fields::PERSPECTIVE));
        assert_eq!(child.get_str(fields::PERSPECTIVE), Some("user"));
    }

    #[test]
    fn merge_replaces_top_level_fields() {
        let mut s = State::new().with("a", 1).with("b", 2);
        s.merge(State::new().with("b", 3).with("c", 4));
        assert_eq!(s.get("a"), Some(&json!(1)));
        assert_eq!(s.get("b"), Some(&json!(3)));
        assert_eq!(s.get("c"), Some(&json!(4)));
    }

    #[test]
    fn get_string_list_renders_non_strings() {
        let s = State::new().with("items", json!(["a", 2, true]));
        assert_eq!(
            s.get_string_list("items"),
            Some(vec!["a".to_string(), "2".to_string(), "true".to_string()])
        );
        assert_eq!(s.get_string_list("missing"), None);
        let s = State::new().with("items", "not a list");
        assert_eq!(s.get_string_list("items"), None);
    }

    #[test]
    fn serializes_as_plain_object() {
        let s: State = [("doc", "text")].into_iter().collect();
        assert_eq!(serde_json::to_value(&s).unwrap(), json!({"doc": "text"}));
    }
}
