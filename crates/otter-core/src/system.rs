//! The diff algebra a document type plugs into the commit graph.
//!
//! An [`OtSystem`] is pure and synchronous: it never touches storage and
//! never observes document state. Every graph algorithm is written against
//! this trait so that the same merge machinery serves any document type.
//!
//! # Laws
//!
//! Implementations must uphold, for every reachable state `s`:
//!
//! - `apply(apply(s, d), invert(d)) == s`
//! - `squash(squash(d)) == squash(d)` and `apply(s, squash(d)) == apply(s, d)`
//! - for `t = transform(l, r)`: `apply(apply(s, r), t.left) == apply(apply(s, l), t.right)`
//!
//! Conflicting edits on the same logical field must be resolved by a fixed
//! tie-break that does not depend on which side is `left`, so two replicas
//! computing the transform independently reach the same document.

use crate::error::OtError;

/// Output of [`OtSystem::transform`].
///
/// `left` continues the right-hand input, `right` continues the left-hand
/// input; both continuations end at the same document state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult<D> {
    /// Diffs to apply after the right-hand input.
    pub left: Vec<D>,
    /// Diffs to apply after the left-hand input.
    pub right: Vec<D>,
    /// Whether a tie-break rule had to discard one side's edit.
    pub has_conflict: bool,
}

impl<D> TransformResult<D> {
    /// Both sides already agree; nothing to apply.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
            has_conflict: false,
        }
    }

    /// Non-conflicting continuations.
    #[must_use]
    pub const fn of(left: Vec<D>, right: Vec<D>) -> Self {
        Self {
            left,
            right,
            has_conflict: false,
        }
    }

    /// Continuations produced by a tie-break.
    #[must_use]
    pub const fn conflict(left: Vec<D>, right: Vec<D>) -> Self {
        Self {
            left,
            right,
            has_conflict: true,
        }
    }

    /// Swap the orientation, as if the inputs had been passed the other way round.
    #[must_use]
    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
            has_conflict: self.has_conflict,
        }
    }
}

/// Diff algebra for one document type.
pub trait OtSystem<D>: Send + Sync {
    /// True when applying `diff` leaves every state unchanged.
    fn is_empty(&self, diff: &D) -> bool;

    /// True when every diff in `diffs` is empty.
    fn is_empty_list(&self, diffs: &[D]) -> bool {
        diffs.iter().all(|diff| self.is_empty(diff))
    }

    /// Diffs undoing `diffs`, in reverse order.
    fn invert(&self, diffs: &[D]) -> Vec<D>;

    /// Shortest sequence equivalent to `diffs`. Empty diffs are dropped.
    fn squash(&self, diffs: &[D]) -> Vec<D>;

    /// Reconcile two sequences that start from the same state.
    ///
    /// # Errors
    ///
    /// Returns [`OtError::TransformConflict`] when the inputs are malformed or
    /// cannot describe divergence from a common state.
    fn transform(&self, left: &[D], right: &[D]) -> Result<TransformResult<D>, OtError>;
}

#[cfg(test)]
mod tests {
    use super::TransformResult;

    #[test]
    fn swapped_exchanges_sides_and_keeps_conflict_flag() {
        let result = TransformResult::conflict(vec![1], vec![2, 3]).swapped();
        assert_eq!(result.left, vec![2, 3]);
        assert_eq!(result.right, vec![1]);
        assert!(result.has_conflict);
    }

    #[test]
    fn empty_has_no_diffs() {
        let result: TransformResult<u8> = TransformResult::empty();
        assert!(result.left.is_empty() && result.right.is_empty());
        assert!(!result.has_conflict);
    }
}
