//! Selector: user-chosen subset of the inputs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OperationError;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::thought::Thought;

type SelectFn = dyn Fn(&[Thought]) -> Vec<usize> + Send + Sync;

/// Keeps the thoughts at the indices returned by a closure over the whole input slice.
///
/// Indices out of range or repeated are ignored; kept thoughts stay in input order.
pub struct Selector {
    select: Arc<SelectFn>,
}

impl Selector {
    pub fn new<F>(select: F) -> Self
    where
        F: Fn(&[Thought]) -> Vec<usize> + Send + Sync + 'static,
    {
        Self {
            select: Arc::new(select),
        }
    }

    /// Keeps the thoughts for which `pred` holds.
    pub fn filter<F>(pred: F) -> Self
    where
        F: Fn(&Thought) -> bool + Send + Sync + 'static,
    {
        Self::new(move |ts| {
            ts.iter()
                .enumerate()
                .filter(|(_, t)| pred(t))
                .map(|(i, _)| i)
                .collect()
        })
    }
}

#[async_trait]
impl Operation for Selector {
    fn kind(&self) -> OperationKind {
        OperationKind::Selector
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        _ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let mut chosen = vec![false; inputs.len()];
        for i in (self.select)(&inputs) {
            if let Some(slot) = chosen.get_mut(i) {
                *slot = true;
            }
        }
        Ok(inputs
            .into_iter()
            .zip(chosen)
            .filter_map(|(t, keep)| keep.then_some(t))
            .collect())
    }
}
