#![no_main]

use libfuzzer_sys::fuzz_target;
use otter_core::dictionary::{DictionaryOperation, DictionaryOtSystem, DictionaryState, SetOperation};
use otter_core::{OtState, OtSystem};

/// Each 3-byte chunk is one edit: key, value (5 deletes), and which branch.
fn branches(data: &[u8]) -> (Vec<DictionaryOperation>, Vec<DictionaryOperation>) {
    let mut left = (DictionaryState::new(), Vec::new());
    let mut right = (DictionaryState::new(), Vec::new());
    for chunk in data.chunks_exact(3) {
        let key = format!("k{}", chunk[0] % 4);
        let value = (chunk[1] % 6 != 5).then(|| format!("v{}", chunk[1] % 6));
        let (state, diffs) = if chunk[2] & 1 == 0 { &mut left } else { &mut right };
        let op = DictionaryOperation::single(&key, SetOperation::set(state.get(&key), value.as_deref()));
        state.apply(&op);
        diffs.push(op);
    }
    (left.1, right.1)
}

fuzz_target!(|data: &[u8]| {
    let system = DictionaryOtSystem;
    let (left, right) = branches(data);
    let result = system.transform(&left, &right).expect("branches share a base");

    let mut via_left = DictionaryState::new();
    via_left.apply_all(&left);
    via_left.apply_all(&result.right);

    let mut via_right = DictionaryState::new();
    via_right.apply_all(&right);
    via_right.apply_all(&result.left);

    assert_eq!(via_left, via_right);

    let swapped = system.transform(&right, &left).expect("branches share a base");
    let mut swapped_state = DictionaryState::new();
    swapped_state.apply_all(&right);
    swapped_state.apply_all(&swapped.right);
    assert_eq!(swapped_state, via_left);
});
