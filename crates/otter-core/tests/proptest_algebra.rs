use otter_core::OtSystem;
use otter_core::dictionary::DictionaryOtSystem;
use proptest::prelude::*;

#[path = "generators.rs"]
mod generators;
use generators::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn invert_restores_state(base in arb_state(), intents in arb_intents()) {
        let system = DictionaryOtSystem;
        let ops = realize(&base, &intents);
        let forward = applied(&base, &ops);
        prop_assert_eq!(applied(&forward, &system.invert(&ops)), base);
    }

    #[test]
    fn squash_is_equivalent(base in arb_state(), intents in arb_intents()) {
        let system = DictionaryOtSystem;
        let ops = realize(&base, &intents);
        let squashed = system.squash(&ops);
        prop_assert_eq!(applied(&base, &squashed), applied(&base, &ops));
        prop_assert!(squashed.len() <= 1);
    }

    #[test]
    fn squash_is_idempotent(base in arb_state(), intents in arb_intents()) {
        let system = DictionaryOtSystem;
        let once = system.squash(&realize(&base, &intents));
        prop_assert_eq!(system.squash(&once), once);
    }

    #[test]
    fn squash_drops_empty_diffs(base in arb_state(), intents in arb_intents()) {
        let system = DictionaryOtSystem;
        let squashed = system.squash(&realize(&base, &intents));
        prop_assert!(squashed.iter().all(|diff| !system.is_empty(diff)));
    }

    #[test]
    fn transform_converges(
        base in arb_state(),
        left_intents in arb_intents(),
        right_intents in arb_intents(),
    ) {
        let system = DictionaryOtSystem;
        let left = realize(&base, &left_intents);
        let right = realize(&base, &right_intents);

        let result = system.transform(&left, &right).expect("shared base");
        let via_left = applied(&applied(&base, &left), &result.right);
        let via_right = applied(&applied(&base, &right), &result.left);
        prop_assert_eq!(via_left, via_right);
    }

    #[test]
    fn transform_is_symmetric(
        base in arb_state(),
        left_intents in arb_intents(),
        right_intents in arb_intents(),
    ) {
        let system = DictionaryOtSystem;
        let left = realize(&base, &left_intents);
        let right = realize(&base, &right_intents);

        let forward = system.transform(&left, &right).expect("shared base");
        let backward = system.transform(&right, &left).expect("shared base");
        prop_assert_eq!(forward, backward.swapped());
    }

    #[test]
    fn transform_against_nothing_is_identity(base in arb_state(), intents in arb_intents()) {
        let system = DictionaryOtSystem;
        let ops = realize(&base, &intents);
        let result = system.transform(&ops, &[]).expect("shared base");
        prop_assert!(result.right.is_empty());
        prop_assert_eq!(applied(&base, &result.left), applied(&base, &ops));
        prop_assert!(!result.has_conflict);
    }
}
