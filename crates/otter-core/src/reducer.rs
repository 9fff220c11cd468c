//! Diff-accumulation policies for backward graph walks.
//!
//! A walk starts at a head with [`DiffsReducer::initial`] and, every time it
//! steps from a commit to one of its parents, folds the parent edge's diffs
//! into the accumulator. The accumulator therefore always describes the way
//! *forward* from the commit currently visited to the head the walk came from.

use std::sync::Arc;

use crate::system::OtSystem;

/// Combines per-edge diffs while walking from a head towards its ancestors.
pub trait DiffsReducer<D>: Send + Sync {
    /// Accumulated value carried along each path.
    type Acc: Clone + Send + Sync;

    /// Value at the starting head.
    fn initial(&self) -> Self::Acc;

    /// Step from a child to one of its parents. `edge` leads from that parent
    /// to the child whose accumulator is `acc`.
    fn accumulate(&self, acc: &Self::Acc, edge: &[D]) -> Self::Acc;
}

/// Keep every diff, unsquashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToList;

impl<D: Clone + Send + Sync> DiffsReducer<D> for ToList {
    type Acc = Vec<D>;

    fn initial(&self) -> Vec<D> {
        Vec::new()
    }

    fn accumulate(&self, acc: &Vec<D>, edge: &[D]) -> Vec<D> {
        let mut diffs = Vec::with_capacity(edge.len() + acc.len());
        diffs.extend_from_slice(edge);
        diffs.extend_from_slice(acc);
        diffs
    }
}

/// Squash after every step so long walks stay compact.
pub struct ToSquashedList<S> {
    system: Arc<S>,
}

impl<S> ToSquashedList<S> {
    #[must_use]
    pub const fn new(system: Arc<S>) -> Self {
        Self { system }
    }
}

impl<D, S> DiffsReducer<D> for ToSquashedList<S>
where
    D: Clone + Send + Sync,
    S: OtSystem<D>,
{
    type Acc = Vec<D>;

    fn initial(&self) -> Vec<D> {
        Vec::new()
    }

    fn accumulate(&self, acc: &Vec<D>, edge: &[D]) -> Vec<D> {
        let mut diffs = Vec::with_capacity(edge.len() + acc.len());
        diffs.extend_from_slice(edge);
        diffs.extend_from_slice(acc);
        self.system.squash(&diffs)
    }
}

/// Track reachability only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl<D> DiffsReducer<D> for Discard {
    type Acc = ();

    fn initial(&self) {}

    fn accumulate(&self, _acc: &(), _edge: &[D]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{DictionaryOperation, DictionaryOtSystem, SetOperation};

    #[test]
    fn to_list_prepends_parent_edges() {
        let reducer = ToList;
        let acc = DiffsReducer::<u8>::initial(&reducer);
        let acc = reducer.accumulate(&acc, &[3, 4]);
        let acc = reducer.accumulate(&acc, &[1, 2]);
        assert_eq!(acc, vec![1, 2, 3, 4]);
    }

    #[test]
    fn to_squashed_list_collapses_chain() {
        let reducer = ToSquashedList::new(Arc::new(DictionaryOtSystem));
        let acc: Vec<DictionaryOperation> = reducer.initial();
        let second = DictionaryOperation::single("a", SetOperation::set(Some("1"), Some("2")));
        let first = DictionaryOperation::single("a", SetOperation::set(None, Some("1")));
        let acc = reducer.accumulate(&acc, &[second]);
        let acc = reducer.accumulate(&acc, &[first]);
        assert_eq!(
            acc,
            vec![DictionaryOperation::single("a", SetOperation::set(None, Some("2")))]
        );
    }
}
