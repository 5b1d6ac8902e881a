//! Score: assign a quality score to every thought.
//!
//! Scorers come in two flavours: local functions over the state ([`FnScorer`]) and label-set
//! comparison against a reference field that can ask the similarity judge about near matches
//! ([`LabelSetScorer`]). A judge failure never fails the node; the pair is scored lexically and the
//! fallback is counted in the metrics.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use run_config::RunConfig;
use serde_json::{json, Value};

use crate::error::OperationError;
use crate::logging;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::state::{fields, State};
use crate::thought::Thought;

/// What a scorer returns for one state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: f64,
    /// Written to `evaluation_metrics` when present.
    pub metrics: Option<Value>,
}

impl ScoreOutcome {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            metrics: None,
        }
    }
}

/// Computes a score for one state.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Static configuration check, run at graph compile time.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    async fn score(
        &self,
        state: &State,
        ctx: &OperationContext,
    ) -> Result<ScoreOutcome, OperationError>;
}

/// Scorer backed by a plain function of the state.
#[derive(Clone)]
pub struct FnScorer {
    f: Arc<dyn Fn(&State) -> f64 + Send + Sync>,
}

impl FnScorer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&State) -> f64 + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl Scorer for FnScorer {
    async fn score(
        &self,
        state: &State,
        _ctx: &OperationContext,
    ) -> Result<ScoreOutcome, OperationError> {
        Ok(ScoreOutcome::new((self.f)(state)))
    }
}

/// F1 between a predicted label list and a reference label list.
///
/// Exact matches (after normalization) count 1 each. Each remaining predicted label is compared
/// against every still-unclaimed reference label; the best similarity above the acceptance
/// threshold counts as a fuzzy hit and claims that reference label. Similarity comes from the
/// judge when one is configured and enabled, otherwise from lexical Jaccard.
#[derive(Debug, Clone)]
pub struct LabelSetScorer {
    predicted: String,
    reference: String,
    acceptance_threshold: f64,
    use_judge: bool,
}

impl Default for LabelSetScorer {
    fn default() -> Self {
        Self {
            predicted: fields::CANDIDATES.to_string(),
            reference: fields::GROUND_TRUTH.to_string(),
            acceptance_threshold: 0.7,
            use_judge: true,
        }
    }
}

impl LabelSetScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default fields with the run's acceptance threshold.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new().acceptance_threshold(config.acceptance_threshold)
    }

    pub fn fields(mut self, predicted: impl Into<String>, reference: impl Into<String>) -> Self {
        self.predicted = predicted.into();
        self.reference = reference.into();
        self
    }

    pub fn acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    /// Whether to ask the similarity judge (when the run has one) for non-exact pairs.
    pub fn use_judge(mut self, use_judge: bool) -> Self {
        self.use_judge = use_judge;
        self
    }

    fn labels(&self, state: &State, field: &str) -> Result<Vec<String>, OperationError> {
        match state.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => state.get_string_list(field).ok_or_else(|| {
                OperationError::Configuration(format!("field '{}' is not a list", field))
            }),
        }
    }

    async fn similarity(
        &self,
        ctx: &OperationContext,
        a: (&str, &str),
        b: (&str, &str),
        fallbacks: &mut u32,
    ) -> f64 {
        if self.use_judge {
            if let Some(judge) = &ctx.judge {
                match ctx.gate.judge(judge.as_ref(), a.1, b.1).await {
                    Ok(j) => return j.similarity,
                    Err(e) => {
                        *fallbacks += 1;
                        logging::log_scorer_fallback(&ctx.node_id, &e.to_string());
                    }
                }
            }
        }
        lexical_similarity(a.0, b.0)
    }
}

#[async_trait]
impl Scorer for LabelSetScorer {
    fn validate(&self) -> Result<(), String> {
        if self.predicted.is_empty() || self.reference.is_empty() {
            return Err("label fields must be non-empty".into());
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(format!(
                "acceptance_threshold must be within [0, 1], got {}",
                self.acceptance_threshold
            ));
        }
        Ok(())
    }

    async fn score(
        &self,
        state: &State,
        ctx: &OperationContext,
    ) -> Result<ScoreOutcome, OperationError> {
        if !state.contains(&self.reference) {
            return Err(OperationError::Configuration(format!(
                "reference field '{}' missing",
                self.reference
            )));
        }
        let predicted = self.labels(state, &self.predicted)?;
        let reference = self.labels(state, &self.reference)?;

        if predicted.is_empty() || reference.is_empty() {
            let f1 = if predicted.is_empty() && reference.is_empty() {
                1.0
            } else {
                0.0
            };
            return Ok(ScoreOutcome {
                score: f1,
                metrics: Some(metrics(f1, f1, f1, 0, 0.0, &[], 0)),
            });
        }

        let pred_norm: Vec<String> = predicted.iter().map(|p| normalize_label(p)).collect();
        let ref_norm: Vec<String> = reference.iter().map(|r| normalize_label(r)).collect();
        let pred_set: HashSet<&str> = pred_norm.iter().map(String::as_str).collect();
        let ref_set: HashSet<&str> = ref_norm.iter().map(String::as_str).collect();
        let exact = pred_set.intersection(&ref_set).count();

        let mut claimed: HashSet<usize> = HashSet::new();
        let mut fuzzy = 0.0;
        let mut matches = Vec::new();
        let mut fallbacks = 0u32;
        for (pi, pn) in pred_norm.iter().enumerate() {
            if ref_set.contains(pn.as_str()) {
                continue;
            }
            let mut best: Option<(usize, f64)> = None;
            for (ri, rn) in ref_norm.iter().enumerate() {
                if pred_set.contains(rn.as_str()) || claimed.contains(&ri) {
                    continue;
                }
                let sim = self
                    .similarity(
                        ctx,
                        (pn.as_str(), predicted[pi].as_str()),
                        (rn.as_str(), reference[ri].as_str()),
                        &mut fallbacks,
                    )
                    .await;
                if best.map_or(sim > 0.0, |(_, b)| sim > b) {
                    best = Some((ri, sim));
                }
            }
            if let Some((ri, sim)) = best {
                if sim > self.acceptance_threshold {
                    fuzzy += sim;
                    claimed.insert(ri);
                    matches.push(format!("{} <-> {} ({:.2})", predicted[pi], reference[ri], sim));
                }
            }
        }

        let total = exact as f64 + fuzzy;
        let precision = total / predicted.len() as f64;
        let recall = total / reference.len() as f64;
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Ok(ScoreOutcome {
            score: f1,
            metrics: Some(metrics(
                f1, precision, recall, exact, fuzzy, &matches, fallbacks,
            )),
        })
    }
}

fn metrics(
    f1: f64,
    precision: f64,
    recall: f64,
    exact: usize,
    fuzzy: f64,
    matches: &[String],
    fallbacks: u32,
) -> Value {
    json!({
        "f1_score": f1,
        "precision": precision,
        "recall": recall,
        "exact_matches": exact,
        "fuzzy_score": fuzzy,
        "semantic_matches": matches,
        "fallbacks": fallbacks,
    })
}

fn parenthesised_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)|（[^）]*）").expect("static regex"))
}

/// Lower-cases, collapses whitespace and strips parenthesised text.
pub(crate) fn normalize_label(label: &str) -> String {
    let collapsed = label
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    parenthesised_re()
        .replace_all(&collapsed, "")
        .trim()
        .to_string()
}

/// Token-set Jaccard; character-set Jaccard when either side is a single token.
pub(crate) fn lexical_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.len() > 1 && tb.len() > 1 {
        return jaccard(&ta, &tb);
    }
    let ca: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let cb: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    jaccard(&ca, &cb)
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Scores every input thought in place.
///
/// Invalid thoughts get 0.0 without consulting the scorer. With a solved threshold configured,
/// thoughts scoring at or above it are marked solved.
pub struct Score {
    scorer: Arc<dyn Scorer>,
    solved_threshold: Option<f64>,
}

impl Score {
    pub fn new(scorer: impl Scorer + 'static) -> Self {
        Self {
            scorer: Arc::new(scorer),
            solved_threshold: None,
        }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&State) -> f64 + Send + Sync + 'static,
    {
        Self::new(FnScorer::new(f))
    }

    pub fn with_solved_threshold(mut self, threshold: f64) -> Self {
        self.solved_threshold = Some(threshold);
        self
    }

    /// Scores one thought in place.
    pub(crate) async fn apply(
        scorer: &dyn Scorer,
        solved_threshold: Option<f64>,
        thought: &mut Thought,
        ctx: &OperationContext,
    ) -> Result<(), OperationError> {
        if thought.valid {
            let outcome = scorer.score(&thought.state, ctx).await?;
            thought.score = outcome.score;
            if let Some(m) = outcome.metrics {
                thought.state.set(fields::EVALUATION_METRICS, m);
            }
        } else {
            thought.score = 0.0;
        }
        thought.scored = true;
        if let Some(threshold) = solved_threshold {
            thought.solved = thought.valid && thought.score >= threshold;
        }
        Ok(())
    }
}

#[async_trait]
impl Operation for Score {
    fn kind(&self) -> OperationKind {
        OperationKind::Score
    }

    fn validate(&self) -> Result<(), String> {
        self.scorer.validate()
    }

    async fn execute(
        &self,
        mut inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let scorer = self.scorer.as_ref();
        let threshold = self.solved_threshold;
        let results = join_all(
            inputs
                .iter_mut()
                .map(|t| Self::apply(scorer, threshold, t, ctx)),
        )
        .await;
        for r in results {
            r?;
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockJudge;
    use crate::operation::test_support::idle_context;

    fn labelled(pred: &[&str], truth: &[&str]) -> State {
        State::new()
            .with(fields::CANDIDATES, pred.to_vec())
            .with(fields::GROUND_TRUTH, truth.to_vec())
    }

    #[test]
    fn normalize_strips_case_space_and_parentheses() {
        assert_eq!(normalize_label("  Job   Information (EIF) "), "job information");
        assert_eq!(normalize_label("职位信息（外部）"), "职位信息");
    }

    #[test]
    fn lexical_similarity_token_and_char_levels() {
        assert!((lexical_similarity("job info table", "job info") - 2.0 / 3.0).abs() < 1e-9);
        assert!((lexical_similarity("职位信息", "职位信息表") - 0.8).abs() < 1e-9);
        assert_eq!(lexical_similarity("", "x"), 0.0);
    }

    #[tokio::test]
    async fn exact_match_is_perfect() {
        let ctx = idle_context();
        let out = LabelSetScorer::new()
            .score(&labelled(&["Job information"], &["job information"]), &ctx)
            .await
            .unwrap();
        assert_eq!(out.score, 1.0);
        assert_eq!(out.metrics.unwrap()["exact_matches"], 1);
    }

    #[tokio::test]
    async fn empty_lists() {
        let ctx = idle_context();
        let s = LabelSetScorer::new();
        assert_eq!(s.score(&labelled(&[], &[]), &ctx).await.unwrap().score, 1.0);
        assert_eq!(s.score(&labelled(&["a"], &[]), &ctx).await.unwrap().score, 0.0);
    }

    #[tokio::test]
    async fn judge_similarity_counts_as_fuzzy_hit() {
        let mut ctx = idle_context();
        ctx.judge = Some(Arc::new(MockJudge::constant(0.9)));
        let out = LabelSetScorer::new()
            .score(&labelled(&["staff records"], &["employee table"]), &ctx)
            .await
            .unwrap();
        assert!((out.score - 0.9).abs() < 1e-9);
        let m = out.metrics.unwrap();
        assert_eq!(m["semantic_matches"].as_array().unwrap().len(), 1);
        assert_eq!(m["fallbacks"], 0);
    }

    #[tokio::test]
    async fn judge_failure_falls_back_to_lexical() {
        let mut ctx = idle_context();
        ctx.judge = Some(Arc::new(MockJudge::failing()));
        let out = LabelSetScorer::new()
            .score(&labelled(&["职位信息表"], &["职位信息"]), &ctx)
            .await
            .unwrap();
        // char Jaccard 0.8 > 0.7 => one fuzzy hit of 0.8
        assert!((out.score - 0.8).abs() < 1e-9);
        assert_eq!(out.metrics.unwrap()["fallbacks"], 1);
    }

    #[tokio::test]
    async fn reference_label_claimed_once() {
        let mut ctx = idle_context();
        ctx.judge = Some(Arc::new(MockJudge::constant(0.95)));
        let out = LabelSetScorer::new()
            .score(&labelled(&["a one", "a two"], &["b"]), &ctx)
            .await
            .unwrap();
        // one fuzzy hit: precision 0.95/2, recall 0.95/1
        let p = 0.475;
        let r = 0.95;
        assert!((out.score - 2.0 * p * r / (p + r)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_reference_is_configuration_error() {
        let ctx = idle_context();
        let err = LabelSetScorer::new()
            .score(&State::new().with(fields::CANDIDATES, vec!["a"]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Configuration(_)));
    }

    #[tokio::test]
    async fn score_op_zeroes_invalid_and_marks_solved() {
        let ctx = idle_context();
        let good = Thought::new(0, State::new().with("q", 0.9));
        let mut bad = Thought::new(1, State::new().with("q", 0.9));
        bad.valid = false;
        let op = Score::from_fn(|s| s.get_f64("q").unwrap_or(0.0)).with_solved_threshold(0.8);
        let out = op.execute(vec![good, bad], &ctx).await.unwrap();
        assert!(out.iter().all(|t| t.scored));
        assert_eq!(out[0].score, 0.9);
        assert!(out[0].solved);
        assert_eq!(out[1].score, 0.0);
        assert!(!out[1].solved);
    }

    #[tokio::test]
    async fn metrics_written_to_state() {
        let ctx = idle_context();
        let t = Thought::new(0, labelled(&["x"], &["x"]));
        let out = Score::new(LabelSetScorer::new())
            .execute(vec![t], &ctx)
            .await
            .unwrap();
        assert_eq!(
            out[0].state.get(fields::EVALUATION_METRICS).unwrap()["f1_score"],
            1.0
        );
    }
}
