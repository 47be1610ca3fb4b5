//! Property-based tests for trigger conversion.
//!
//! Every trigger built through the public constructors must survive the
//! round trip through the engine's loose field-bag representation.

use chrono::{DateTime, TimeZone, Utc};
use drover_sched::{RepeatBound, Trigger};
use proptest::prelude::*;

/// Generate an arbitrary timestamp within a sane operational window.
fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 through ~2100.
    (946_684_800i64..4_102_444_800).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn arb_bound() -> impl Strategy<Value = RepeatBound> {
    prop_oneof![
        (1u32..10_000).prop_map(RepeatBound::Count),
        arb_time().prop_map(RepeatBound::Until),
        Just(RepeatBound::Indefinite),
    ]
}

/// Arbitrary normalized trigger, as the public API would produce.
fn arb_trigger() -> impl Strategy<Value = Trigger> {
    prop_oneof![
        Just(Trigger::Now),
        arb_time().prop_map(Trigger::At),
        (
            prop::option::of(arb_time()),
            0i64..=86_400_000,
            arb_bound()
        )
            .prop_map(|(start, interval, bound)| Trigger::repeat(start, interval, bound)),
        "[0-9*/ ?]{5,20}".prop_map(Trigger::Cron),
    ]
}

proptest! {
    #[test]
    fn trigger_roundtrips_through_engine_form(trigger in arb_trigger()) {
        let engine = trigger.to_engine();
        let back = Trigger::from_engine(&engine);
        prop_assert_eq!(back, trigger);
    }

    #[test]
    fn repeat_constructor_normalizes_count_zero(
        start in prop::option::of(arb_time()),
        interval in -1000i64..=86_400_000,
    ) {
        let trigger = Trigger::repeat(start, interval, RepeatBound::Count(0));
        // Count(0) means a single fire; the repeating form never appears.
        prop_assert!(!trigger.is_repeating());
        // And the normalized form still round-trips.
        prop_assert_eq!(Trigger::from_engine(&trigger.to_engine()), trigger);
    }

    #[test]
    fn negative_intervals_clamp_to_zero(
        start in prop::option::of(arb_time()),
        interval in i64::MIN..0,
        bound in arb_bound(),
    ) {
        match Trigger::repeat(start, interval, bound) {
            Trigger::Repeat { interval_ms, .. } => prop_assert_eq!(interval_ms, 0),
            other => prop_assert!(false, "expected repeat, got {}", other),
        }
    }
}
