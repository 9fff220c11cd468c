#![no_main]

use libfuzzer_sys::fuzz_target;
use otter_core::dictionary::{DictionaryOperation, DictionaryOtSystem, DictionaryState, SetOperation};
use otter_core::{OtState, OtSystem};

fuzz_target!(|data: &[u8]| {
    let system = DictionaryOtSystem;
    let mut state = DictionaryState::new();
    let mut diffs = Vec::new();
    for pair in data.chunks_exact(2) {
        let key = format!("k{}", pair[0] % 8);
        let value = (pair[1] % 4 != 3).then(|| format!("v{}", pair[1] % 4));
        let op = DictionaryOperation::single(&key, SetOperation::set(state.get(&key), value.as_deref()));
        state.apply(&op);
        diffs.push(op);
    }

    let squashed = system.squash(&diffs);
    assert!(squashed.iter().all(|diff| !system.is_empty(diff)));
    assert_eq!(system.squash(&squashed), squashed);

    let mut replayed = DictionaryState::new();
    replayed.apply_all(&squashed);
    assert_eq!(replayed, state);

    replayed.apply_all(&system.invert(&diffs));
    assert!(replayed.is_empty());
});
