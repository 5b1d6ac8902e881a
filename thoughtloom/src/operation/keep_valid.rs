//! KeepValid: drop thoughts that were validated and found invalid.

use async_trait::async_trait;

use crate::error::OperationError;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::thought::Thought;

/// Keeps thoughts that are valid or were never validated.
///
/// Thoughts invalidated by a failed generation call are `validated == false` and therefore pass;
/// follow with a Score (which zeroes them) and KeepBestN to rank them out.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepValid;

#[async_trait]
impl Operation for KeepValid {
    fn kind(&self) -> OperationKind {
        OperationKind::KeepValid
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        _ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        Ok(inputs
            .into_iter()
            .filter(|t| !t.validated || t.valid)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::test_support::idle_context;
    use crate::state::State;

    #[tokio::test]
    async fn filters_validated_invalid_only() {
        let ctx = idle_context();
        let ok = Thought::new(0, State::new());
        let mut checked_bad = Thought::new(1, State::new());
        checked_bad.validated = true;
        checked_bad.valid = false;
        let unchecked_bad = Thought::invalid(2, State::new(), "timeout");
        let out = KeepValid
            .execute(vec![ok, checked_bad, unchecked_bad], &ctx)
            .await
            .unwrap();
        assert_eq!(out.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![0, 2]);
    }
}
