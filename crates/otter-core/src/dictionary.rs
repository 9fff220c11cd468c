//! A string dictionary document with per-key "set" operations.
//!
//! Each operation records, for every key it touches, the value it expects to
//! find (`prev`) and the value it leaves behind (`next`). `None` means the key
//! is absent. Recording `prev` makes every operation invertible and lets
//! [`DictionaryOtSystem::transform`] detect inputs that do not share a base.
//!
//! # Tie-break
//!
//! When both sides of a transform set the same key to different values the
//! greater `next` wins, with `None` ordered below every value. The rule only
//! looks at the two values, never at which side they came from, so every
//! replica resolves the conflict identically.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};

use crate::error::OtError;
use crate::state::OtState;
use crate::system::{OtSystem, TransformResult};

/// Replace `prev` with `next` under one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetOperation {
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl SetOperation {
    #[must_use]
    pub fn set(prev: Option<&str>, next: Option<&str>) -> Self {
        Self {
            prev: prev.map(str::to_owned),
            next: next.map(str::to_owned),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prev == self.next
    }

    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            prev: self.next.clone(),
            next: self.prev.clone(),
        }
    }
}

/// A batch of key updates applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryOperation(BTreeMap<String, SetOperation>);

impl DictionaryOperation {
    #[must_use]
    pub const fn new(operations: BTreeMap<String, SetOperation>) -> Self {
        Self(operations)
    }

    /// Operation touching a single key.
    #[must_use]
    pub fn single(key: &str, operation: SetOperation) -> Self {
        Self(BTreeMap::from([(key.to_owned(), operation)]))
    }

    #[must_use]
    pub const fn operations(&self) -> &BTreeMap<String, SetOperation> {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(SetOperation::is_empty)
    }
}

impl FromIterator<(String, SetOperation)> for DictionaryOperation {
    fn from_iter<I: IntoIterator<Item = (String, SetOperation)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// [`OtSystem`] for [`DictionaryOperation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryOtSystem;

impl DictionaryOtSystem {
    /// Net effect of `diffs` per key, with no-op keys kept.
    fn fold(diffs: &[DictionaryOperation]) -> BTreeMap<String, SetOperation> {
        let mut folded: BTreeMap<String, SetOperation> = BTreeMap::new();
        for diff in diffs {
            for (key, op) in diff.operations() {
                match folded.entry(key.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(op.clone());
                    }
                    Entry::Occupied(mut slot) => {
                        slot.get_mut().next.clone_from(&op.next);
                    }
                }
            }
        }
        folded
    }

    /// Net effect of `diffs` per key, without keys that end where they began.
    fn effective(diffs: &[DictionaryOperation]) -> BTreeMap<String, SetOperation> {
        let mut folded = Self::fold(diffs);
        folded.retain(|_, op| !op.is_empty());
        folded
    }

    fn into_diffs(operations: BTreeMap<String, SetOperation>) -> Vec<DictionaryOperation> {
        let operation: DictionaryOperation = operations
            .into_iter()
            .filter(|(_, op)| !op.is_empty())
            .collect();
        if operation.operations().is_empty() {
            Vec::new()
        } else {
            vec![operation]
        }
    }
}

impl OtSystem<DictionaryOperation> for DictionaryOtSystem {
    fn is_empty(&self, diff: &DictionaryOperation) -> bool {
        diff.is_empty()
    }

    fn invert(&self, diffs: &[DictionaryOperation]) -> Vec<DictionaryOperation> {
        diffs
            .iter()
            .rev()
            .map(|diff| {
                diff.operations()
                    .iter()
                    .map(|(key, op)| (key.clone(), op.inverted()))
                    .collect()
            })
            .collect()
    }

    fn squash(&self, diffs: &[DictionaryOperation]) -> Vec<DictionaryOperation> {
        Self::into_diffs(Self::fold(diffs))
    }

    fn transform(
        &self,
        left: &[DictionaryOperation],
        right: &[DictionaryOperation],
    ) -> Result<TransformResult<DictionaryOperation>, OtError> {
        let left_ops = Self::effective(left);
        let mut right_ops = Self::effective(right);

        let mut after_right = BTreeMap::new();
        let mut after_left = BTreeMap::new();
        let mut has_conflict = false;

        for (key, left_op) in left_ops {
            let Some(right_op) = right_ops.remove(&key) else {
                after_right.insert(key, left_op);
                continue;
            };
            if left_op.prev != right_op.prev {
                return Err(OtError::TransformConflict(format!(
                    "key {key:?}: left expects {:?}, right expects {:?}",
                    left_op.prev, right_op.prev
                )));
            }
            if left_op.next == right_op.next {
                continue;
            }
            has_conflict = true;
            if left_op.next > right_op.next {
                after_right.insert(
                    key,
                    SetOperation {
                        prev: right_op.next,
                        next: left_op.next,
                    },
                );
            } else {
                after_left.insert(
                    key,
                    SetOperation {
                        prev: left_op.next,
                        next: right_op.next,
                    },
                );
            }
        }
        after_left.extend(right_ops);

        Ok(TransformResult {
            left: Self::into_diffs(after_right),
            right: Self::into_diffs(after_left),
            has_conflict,
        })
    }
}

/// Materialized dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryState {
    entries: BTreeMap<String, String>,
}

impl DictionaryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operation moving `key` from its current value to `next`.
    #[must_use]
    pub fn set_operation(&self, key: &str, next: Option<&str>) -> DictionaryOperation {
        DictionaryOperation::single(key, SetOperation::set(self.get(key), next))
    }
}

impl OtState<DictionaryOperation> for DictionaryState {
    fn init(&mut self) {
        self.entries.clear();
    }

    fn apply(&mut self, diff: &DictionaryOperation) {
        for (key, op) in diff.operations() {
            match &op.next {
                Some(value) => {
                    self.entries.insert(key.clone(), value.clone());
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(prev: Option<&str>, next: Option<&str>) -> SetOperation {
        SetOperation::set(prev, next)
    }

    fn op(entries: &[(&str, SetOperation)]) -> DictionaryOperation {
        entries
            .iter()
            .map(|(key, op)| ((*key).to_owned(), op.clone()))
            .collect()
    }

    #[test]
    fn is_empty_detects_noop_sets() {
        let system = DictionaryOtSystem;
        assert!(system.is_empty(&op(&[])));
        assert!(system.is_empty(&op(&[("a", set(None, None))])));
        assert!(system.is_empty(&op(&[("a", set(Some("a"), Some("a")))])));
        assert!(!system.is_empty(&op(&[("a", set(None, Some("")))])));
    }

    #[test]
    fn inversion_restores_state() {
        let system = DictionaryOtSystem;
        let mut state = DictionaryState::new();
        state.apply(&op(&[
            ("a", set(None, Some("val_a"))),
            ("b", set(None, Some("val_b"))),
            ("c", set(None, Some("val_c"))),
        ]));
        let initial = state.clone();

        let ops = vec![
            op(&[
                ("a", set(Some("val_a"), Some("new_val_a"))),
                ("b", set(Some("val_b"), Some("val_bb"))),
                ("c", set(Some("val_c"), Some("new_val_c"))),
            ]),
            op(&[
                ("c", set(Some("new_val_c"), Some("new_val_cc"))),
                ("d", set(None, Some("val_d"))),
            ]),
        ];
        state.apply_all(&ops);
        assert_ne!(state, initial);

        state.apply_all(&system.invert(&ops));
        assert_eq!(state, initial);
    }

    #[test]
    fn transform_converges_with_greater_value_winning() {
        let system = DictionaryOtSystem;
        let mut left_state = DictionaryState::new();
        left_state.apply(&op(&[("b", set(None, Some("b")))]));
        let mut right_state = left_state.clone();

        let left = op(&[
            ("a", set(None, Some("ab"))),
            ("b", set(Some("b"), Some("cd"))),
            ("c", set(None, Some("ef"))),
        ]);
        let right = op(&[
            ("a", set(None, Some("bb"))),
            ("b", set(Some("b"), None)),
            ("c", set(None, Some("ef"))),
        ]);
        left_state.apply(&left);
        right_state.apply(&right);

        let result = system
            .transform(&[left], &[right])
            .expect("inputs share a base");
        assert!(result.has_conflict);
        left_state.apply_all(&result.right);
        right_state.apply_all(&result.left);

        assert_eq!(left_state, right_state);
        assert_eq!(left_state.get("a"), Some("bb"));
        assert_eq!(left_state.get("b"), Some("cd"));
        assert_eq!(left_state.get("c"), Some("ef"));
    }

    #[test]
    fn transform_is_symmetric() {
        let system = DictionaryOtSystem;
        let left = vec![op(&[("x", set(None, Some("1"))), ("y", set(None, Some("l")))])];
        let right = vec![op(&[("x", set(None, Some("2"))), ("z", set(None, Some("r")))])];

        let forward = system.transform(&left, &right).expect("transform");
        let backward = system.transform(&right, &left).expect("transform");
        assert_eq!(forward, backward.swapped());
    }

    #[test]
    fn reverted_edit_does_not_win_a_conflict() {
        let system = DictionaryOtSystem;
        let left = vec![
            op(&[("k", set(Some("v"), Some("z")))]),
            op(&[("k", set(Some("z"), Some("v")))]),
        ];
        let right = vec![op(&[("k", set(Some("v"), Some("a")))])];

        let result = system.transform(&left, &right).expect("transform");
        assert!(!result.has_conflict);
        assert!(result.left.is_empty());
        assert_eq!(result.right, vec![op(&[("k", set(Some("v"), Some("a")))])]);
    }

    #[test]
    fn transform_rejects_mismatched_base() {
        let system = DictionaryOtSystem;
        let left = vec![op(&[("k", set(Some("one"), Some("two")))])];
        let right = vec![op(&[("k", set(Some("zero"), Some("three")))])];
        let err = system.transform(&left, &right).expect_err("bases differ");
        assert!(matches!(err, OtError::TransformConflict(_)));
    }

    #[test]
    fn squash_keeps_net_effect() {
        let system = DictionaryOtSystem;
        let ops = vec![
            op(&[
                ("a", set(None, Some("val_a"))),
                ("b", set(None, Some("val_b"))),
                ("c", set(None, Some("val_c"))),
            ]),
            op(&[
                ("a", set(Some("val_a"), Some("new_val_a"))),
                ("b", set(Some("val_b"), None)),
                ("c", set(Some("val_c"), Some("new_val_c"))),
            ]),
            op(&[
                ("c", set(Some("new_val_c"), Some("new_val_cc"))),
                ("d", set(None, Some("val_d"))),
            ]),
        ];

        assert_eq!(
            system.squash(&ops),
            vec![op(&[
                ("a", set(None, Some("new_val_a"))),
                ("c", set(None, Some("new_val_cc"))),
                ("d", set(None, Some("val_d"))),
            ])]
        );
    }

    #[test]
    fn squash_of_sequential_sets_collapses_to_one() {
        let system = DictionaryOtSystem;
        let ops = vec![
            op(&[("a", set(None, Some("1")))]),
            op(&[("a", set(Some("1"), Some("2")))]),
            op(&[("a", set(Some("2"), Some("3")))]),
        ];
        assert_eq!(system.squash(&ops), vec![op(&[("a", set(None, Some("3")))])]);
    }

    #[test]
    fn squash_drops_set_followed_by_its_inverse() {
        let system = DictionaryOtSystem;
        let forward = op(&[("a", set(None, Some("1")))]);
        let ops = vec![forward.clone(), system.invert(&[forward]).remove(0)];
        assert!(system.squash(&ops).is_empty());
    }

    #[test]
    fn operation_serializes_as_plain_map() {
        let operation = op(&[("k", set(None, Some("v")))]);
        let json = serde_json::to_string(&operation).expect("serialize");
        assert_eq!(json, r#"{"k":{"prev":null,"next":"v"}}"#);
        let back: DictionaryOperation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, operation);
    }
}
