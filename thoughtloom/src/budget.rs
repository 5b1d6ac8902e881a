//! Run-wide cost ledger and the gate every capability call goes through.
//!
//! [`CallGate::generate`] and [`CallGate::judge`] acquire a permit from the run-wide semaphore,
//! check the budget, then dispatch under the call timeout. The budget check happens after the
//! permit is held so that, with `concurrency_limit = 1`, call k+1 observes the cost of call k.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::capability::{GenerationCapability, Judgement, RawResponse, SimilarityJudge};
use crate::error::CapabilityError;
use crate::state::State;

/// Costs are accumulated in millionths to keep the counter a plain atomic integer.
const MICROS_PER_UNIT: f64 = 1_000_000.0;

fn to_micros(cost: f64) -> u64 {
    if cost.is_finite() && cost > 0.0 {
        (cost * MICROS_PER_UNIT).round() as u64
    } else {
        0
    }
}

/// Spent cost, dispatched calls and denied calls for one run.
#[derive(Debug, Default)]
pub struct CostLedger {
    limit: Option<f64>,
    spent_micros: AtomicU64,
    calls: AtomicU64,
    denied: AtomicU64,
}

impl CostLedger {
    pub fn new(limit: Option<f64>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn limit(&self) -> Option<f64> {
        self.limit
    }

    pub fn spent(&self) -> f64 {
        self.spent_micros.load(Ordering::SeqCst) as f64 / MICROS_PER_UNIT
    }

    /// Calls actually dispatched to a capability.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls refused because the budget was exhausted.
    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::SeqCst)
    }

    /// True once spent cost has reached the limit.
    pub fn is_exhausted(&self) -> bool {
        match self.limit {
            Some(limit) => self.spent_micros.load(Ordering::SeqCst) >= to_micros(limit),
            None => false,
        }
    }

    pub fn record(&self, cost: f64) {
        self.spent_micros.fetch_add(to_micros(cost), Ordering::SeqCst);
    }

    fn record_dispatch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::SeqCst);
    }
}

/// Outcome of a gated call that did not produce a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    /// The budget was exhausted; nothing was dispatched.
    #[error("budget exhausted, call not dispatched")]
    Denied,

    #[error(transparent)]
    Failed(#[from] CapabilityError),
}

/// Concurrency permits, budget and timeout shared by every node of a run.
#[derive(Debug, Clone)]
pub struct CallGate {
    permits: Arc<Semaphore>,
    ledger: Arc<CostLedger>,
    timeout: Duration,
}

impl CallGate {
    pub fn new(concurrency_limit: usize, budget_limit: Option<f64>, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            ledger: Arc::new(CostLedger::new(budget_limit)),
            timeout,
        }
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gated `GenerationCapability::generate`; the cost of every returned response is recorded.
    pub async fn generate(
        &self,
        capability: &dyn GenerationCapability,
        prompt_context: &State,
        sample_count: usize,
    ) -> Result<Vec<RawResponse>, CallError> {
        let _permit = self.admit().await?;
        let responses = self
            .bounded(capability.generate(prompt_context, sample_count))
            .await?;
        for r in &responses {
            self.ledger.record(r.cost);
        }
        Ok(responses)
    }

    /// Gated `SimilarityJudge::judge_similarity`.
    pub async fn judge(
        &self,
        judge: &dyn SimilarityJudge,
        a: &str,
        b: &str,
    ) -> Result<Judgement, CallError> {
        let _permit = self.admit().await?;
        let judgement = self.bounded(judge.judge_similarity(a, b)).await?;
        self.ledger.record(judgement.cost);
        Ok(judgement)
    }

    async fn admit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, CallError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CallError::Denied)?;
        if self.ledger.is_exhausted() {
            self.ledger.record_denied();
            return Err(CallError::Denied);
        }
        self.ledger.record_dispatch();
        Ok(permit)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CapabilityError>
    where
        F: std::future::Future<Output = Result<T, CapabilityError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MockCapability, MockReply};

    #[test]
    fn ledger_exhausts_at_limit() {
        let ledger = CostLedger::new(Some(0.3));
        assert!(!ledger.is_exhausted());
        ledger.record(0.1);
        ledger.record(0.1);
        assert!(!ledger.is_exhausted());
        ledger.record(0.1);
        assert!(ledger.is_exhausted());
        assert!((ledger.spent() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn unlimited_ledger_never_exhausts() {
        let ledger = CostLedger::new(None);
        ledger.record(1e9);
        assert!(!ledger.is_exhausted());
    }

    #[tokio::test]
    async fn gate_denies_after_budget_spent() {
        let gate = CallGate::new(1, Some(0.2), Duration::from_secs(5));
        let cap = MockCapability::fixed("ok").with_cost_per_call(0.1);
        let ctx = State::new();
        assert!(gate.generate(&cap, &ctx, 1).await.is_ok());
        assert!(gate.generate(&cap, &ctx, 1).await.is_ok());
        assert_eq!(gate.generate(&cap, &ctx, 1).await, Err(CallError::Denied));
        assert_eq!(cap.calls(), 2);
        assert_eq!(gate.ledger().calls(), 2);
        assert_eq!(gate.ledger().denied(), 1);
    }

    #[tokio::test]
    async fn gate_times_out_slow_calls() {
        let gate = CallGate::new(2, None, Duration::from_millis(20));
        let cap = MockCapability::sequence(vec![MockReply::Delayed(
            Duration::from_secs(5),
            "late".into(),
        )]);
        let err = gate.generate(&cap, &State::new(), 1).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Failed(CapabilityError::Timeout(_))
        ));
        assert_eq!(gate.ledger().spent(), 0.0);
    }
}
