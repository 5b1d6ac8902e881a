//! Aggregate: merge the candidate lists of several branches into one thought.
//!
//! Each distinct item (compared after trimming) is resolved by how many branches proposed it:
//! all of them keeps it, a majority keeps it tagged for verification, fewer rejects it unless an
//! [`OverrideRule`] accepts the proposing branch's rationale. Invalid thoughts do not vote.
//!
//! A branch is identified by its `perspective` field; thoughts without one are branches of their
//! own. Several thoughts from one branch (e.g. `keep_n > 1`) cast a single vote per item.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::OperationError;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::state::{fields, State};
use crate::thought::Thought;

/// How an item was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    Unanimous,
    Majority,
    Override,
    Rejected,
}

impl MergePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::Unanimous => "unanimous",
            MergePolicy::Majority => "majority",
            MergePolicy::Override => "override",
            MergePolicy::Rejected => "rejected",
        }
    }
}

/// Accepts a minority item on the strength of the proposing branch's rationale.
pub trait OverrideRule: Send + Sync {
    /// Recorded in the item's resolution.
    fn name(&self) -> &str;

    fn accepts(&self, item: &str, rationale: &str) -> bool;
}

/// Accepts an item whose branch rationale mentions the item and one of the keywords.
///
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct KeywordOverride {
    name: String,
    keywords: Vec<String>,
}

impl KeywordOverride {
    pub fn new<I, S>(name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }
}

impl OverrideRule for KeywordOverride {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, item: &str, rationale: &str) -> bool {
        let rationale = rationale.to_lowercase();
        rationale.contains(&item.to_lowercase())
            && self.keywords.iter().any(|k| rationale.contains(k.as_str()))
    }
}

/// Per-item decision written to the `resolutions` field.
#[derive(Debug, Clone, Serialize)]
struct Resolution {
    item: String,
    policy: MergePolicy,
    supporters: usize,
    branches: Vec<String>,
    rule: Option<String>,
    needs_verification: bool,
}

/// Per-branch fields that do not describe the merged thought.
const BRANCH_FIELDS: [&str; 6] = [
    fields::PERSPECTIVE,
    fields::CURRENT,
    fields::FEEDBACK,
    fields::PREVIOUS_SCORE,
    fields::EVALUATION_METRICS,
    fields::ERROR,
];

/// The valid thoughts of one branch, in sequence order.
struct Branch<'a> {
    label: String,
    thoughts: Vec<&'a Thought>,
}

/// Merges branch candidate lists with the unanimous / majority / override policy.
pub struct Aggregate {
    candidates_field: String,
    rationale_field: String,
    majority_fraction: f64,
    overrides: Vec<Arc<dyn OverrideRule>>,
}

impl Default for Aggregate {
    fn default() -> Self {
        Self {
            candidates_field: fields::CANDIDATES.to_string(),
            rationale_field: fields::RATIONALE.to_string(),
            majority_fraction: 0.5,
            overrides: Vec::new(),
        }
    }
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(mut self, candidates: impl Into<String>, rationale: impl Into<String>) -> Self {
        self.candidates_field = candidates.into();
        self.rationale_field = rationale.into();
        self
    }

    /// An item is a majority item when its supporters exceed `fraction` of the voting branches.
    pub fn majority_fraction(mut self, fraction: f64) -> Self {
        self.majority_fraction = fraction;
        self
    }

    pub fn with_override(mut self, rule: impl OverrideRule + 'static) -> Self {
        self.overrides.push(Arc::new(rule));
        self
    }

    fn branch_items(&self, thought: &Thought) -> Result<Vec<String>, OperationError> {
        let raw = match thought.state.get(&self.candidates_field) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(_) => thought
                .state
                .get_string_list(&self.candidates_field)
                .ok_or_else(|| {
                    OperationError::Configuration(format!(
                        "candidate field '{}' of thought {} is not a list",
                        self.candidates_field, thought.seq
                    ))
                })?,
        };
        let mut items: Vec<String> = Vec::with_capacity(raw.len());
        for item in raw {
            let item = item.trim();
            if !item.is_empty() && !items.iter().any(|i| i == item) {
                items.push(item.to_string());
            }
        }
        Ok(items)
    }

    fn branch_label(thought: &Thought) -> String {
        thought
            .state
            .get_str(fields::PERSPECTIVE)
            .map(str::to_string)
            .unwrap_or_else(|| format!("seq {}", thought.seq))
    }

    /// Groups valid thoughts by branch label, branches ordered by their first thought.
    fn branches(inputs: &[Thought]) -> Vec<Branch<'_>> {
        let mut branches: Vec<Branch<'_>> = Vec::new();
        for thought in inputs.iter().filter(|t| t.valid) {
            let label = Self::branch_label(thought);
            match branches.iter_mut().find(|b| b.label == label) {
                Some(branch) => branch.thoughts.push(thought),
                None => branches.push(Branch {
                    label,
                    thoughts: vec![thought],
                }),
            }
        }
        branches
    }

    fn resolve(
        &self,
        item: &str,
        supporters: &[&Branch<'_>],
        voters: usize,
    ) -> (MergePolicy, Option<String>) {
        if supporters.len() == voters {
            return (MergePolicy::Unanimous, None);
        }
        if supporters.len() as f64 > self.majority_fraction * voters as f64 {
            return (MergePolicy::Majority, None);
        }
        for t in supporters.iter().flat_map(|b| b.thoughts.iter()) {
            let rationale = t.state.get_str(&self.rationale_field).unwrap_or("");
            if let Some(rule) = self.overrides.iter().find(|r| r.accepts(item, rationale)) {
                return (MergePolicy::Override, Some(rule.name().to_string()));
            }
        }
        (MergePolicy::Rejected, None)
    }
}

fn describe(resolutions: &[Resolution]) -> String {
    resolutions
        .iter()
        .map(|r| {
            let rule = r
                .rule
                .as_deref()
                .map(|name| format!(" by rule {}", name))
                .unwrap_or_default();
            format!(
                "{}: {}{} ({})",
                r.item,
                r.policy.as_str(),
                rule,
                r.branches.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Operation for Aggregate {
    fn kind(&self) -> OperationKind {
        OperationKind::Aggregate
    }

    fn validate(&self) -> Result<(), String> {
        if self.candidates_field.is_empty() || self.rationale_field.is_empty() {
            return Err("candidate and rationale fields must be non-empty".into());
        }
        if !(0.0..1.0).contains(&self.majority_fraction) {
            return Err(format!(
                "majority_fraction must be within [0, 1), got {}",
                self.majority_fraction
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let branches = Self::branches(&inputs);
        let Some(first) = branches.first().and_then(|b| b.thoughts.first()) else {
            return Ok(Vec::new());
        };

        // Items in first-appearance order, with the indices of the branches proposing each.
        let mut tally: Vec<(String, Vec<usize>)> = Vec::new();
        for (b, branch) in branches.iter().enumerate() {
            for thought in &branch.thoughts {
                for item in self.branch_items(thought)? {
                    match tally.iter_mut().find(|(i, _)| *i == item) {
                        Some((_, supporters)) if supporters.contains(&b) => {}
                        Some((_, supporters)) => supporters.push(b),
                        None => tally.push((item, vec![b])),
                    }
                }
            }
        }

        let voters = branches.len();
        let mut merged = Vec::new();
        let mut rejected = Vec::new();
        let mut resolutions = Vec::new();
        for (item, indices) in &tally {
            let supporters: Vec<&Branch<'_>> = indices.iter().map(|&b| &branches[b]).collect();
            let (policy, rule) = self.resolve(item, &supporters, voters);
            match policy {
                MergePolicy::Rejected => rejected.push(item.clone()),
                _ => merged.push(item.clone()),
            }
            resolutions.push(Resolution {
                item: item.clone(),
                policy,
                supporters: supporters.len(),
                branches: supporters.iter().map(|b| b.label.clone()).collect(),
                rule,
                needs_verification: matches!(policy, MergePolicy::Majority | MergePolicy::Override),
            });
        }

        let rationale = describe(&resolutions);
        let resolutions = serde_json::to_value(&resolutions)
            .map_err(|e| OperationError::Configuration(format!("resolutions: {}", e)))?;
        let overlay = State::new()
            .with(self.candidates_field.clone(), merged)
            .with(self.rationale_field.clone(), rationale)
            .with(fields::RESOLUTIONS, resolutions)
            .with(fields::REJECTED, rejected)
            .with(fields::PHASE, "merge");
        let mut state = first.state.clone();
        for field in BRANCH_FIELDS {
            state.remove(field);
        }
        state.merge(overlay);
        Ok(vec![Thought::new(ctx.sequencer.next(), state)])
    }
}
