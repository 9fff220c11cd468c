#![allow(dead_code)]

use otter_core::OtState;
use otter_core::dictionary::{DictionaryOperation, DictionaryState, SetOperation};
use proptest::prelude::*;

/// One batch of key assignments; `None` deletes the key.
pub type Intent = Vec<(String, Option<String>)>;

// Small alphabets so concurrent edits collide often.
pub fn arb_key() -> impl Strategy<Value = String> + Clone {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_owned)
}

pub fn arb_value() -> impl Strategy<Value = Option<String>> + Clone {
    prop::option::weighted(
        0.8,
        prop::sample::select(vec!["v0", "v1", "v2", "v3", "v4"]).prop_map(str::to_owned),
    )
}

pub fn arb_intent() -> impl Strategy<Value = Intent> + Clone {
    prop::collection::vec((arb_key(), arb_value()), 1..4)
}

pub fn arb_intents() -> impl Strategy<Value = Vec<Intent>> + Clone {
    prop::collection::vec(arb_intent(), 0..6)
}

pub fn arb_state() -> impl Strategy<Value = DictionaryState> + Clone {
    arb_intents().prop_map(|intents| {
        let mut state = DictionaryState::new();
        let ops = realize(&state, &intents);
        state.apply_all(&ops);
        state
    })
}

/// Turn intents into operations whose `prev` values are consistent with
/// `base` and with each other.
pub fn realize(base: &DictionaryState, intents: &[Intent]) -> Vec<DictionaryOperation> {
    let mut state = base.clone();
    intents
        .iter()
        .map(|intent| {
            let op: DictionaryOperation = intent
                .iter()
                .map(|(key, next)| (key.clone(), SetOperation::set(state.get(key), next.as_deref())))
                .collect();
            state.apply(&op);
            op
        })
        .collect()
}

pub fn applied(base: &DictionaryState, ops: &[DictionaryOperation]) -> DictionaryState {
    let mut state = base.clone();
    state.apply_all(ops);
    state
}
