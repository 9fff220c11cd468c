//! Materialized document state.

/// A document that diffs of type `D` can be applied to.
pub trait OtState<D> {
    /// Reset to the empty document.
    fn init(&mut self);

    /// Apply a single diff.
    fn apply(&mut self, diff: &D);

    /// Apply `diffs` in order.
    fn apply_all(&mut self, diffs: &[D]) {
        for diff in diffs {
            self.apply(diff);
        }
    }
}
