// Property-based tests for the reconnection backoff strategies

use common::retry::{FixedDelay, LinearBackoff, RetryStrategy};
use proptest::prelude::*;
use std::time::Duration;

/// *For any* base, cap, and attempt within budget, the delay without
/// jitter is exactly `min(attempt * base, cap)`.
#[test]
fn property_linear_delay_law() {
    proptest!(|(
        base_ms in 1u64..1_000,
        extra_ms in 0u64..10_000,
        max_attempts in 1u32..50,
        attempt in 1u32..50,
    )| {
        let max_ms = base_ms + extra_ms;
        let strategy = LinearBackoff::new(base_ms, max_ms, max_attempts);

        let delay = strategy.next_delay(attempt);
        if attempt <= max_attempts {
            let expected = (u64::from(attempt) * base_ms).min(max_ms);
            prop_assert_eq!(delay, Some(Duration::from_millis(expected)));
        } else {
            prop_assert_eq!(delay, None);
        }
    });
}

/// *For any* strategy, attempt zero and attempts past the budget yield
/// no delay, and `should_retry` agrees with `next_delay`.
#[test]
fn property_attempt_budget_is_exact() {
    proptest!(|(base_ms in 1u64..500, max_attempts in 1u32..30)| {
        let strategy = LinearBackoff::new(base_ms, base_ms * 100, max_attempts);

        prop_assert!(strategy.next_delay(0).is_none());
        prop_assert!(strategy.next_delay(max_attempts + 1).is_none());

        for attempt in 1..=max_attempts {
            prop_assert_eq!(strategy.should_retry(attempt), strategy.next_delay(attempt).is_some());
        }
    });
}

/// *For any* jitter factor, the produced delay stays within
/// `[delay, delay * (1 + factor)]`.
#[test]
fn property_jitter_stays_bounded() {
    proptest!(|(
        base_ms in 10u64..1_000,
        attempt in 1u32..10,
        jitter in 0.0f64..1.0,
    )| {
        let strategy = LinearBackoff::new(base_ms, base_ms * 20, 10).with_jitter(jitter);

        let bare = (u64::from(attempt) * base_ms).min(base_ms * 20);
        let produced = strategy.next_delay(attempt).expect("within budget").as_millis() as u64;
        let ceiling = bare + (bare as f64 * jitter) as u64;

        prop_assert!(produced >= bare, "{} < {}", produced, bare);
        prop_assert!(produced <= ceiling, "{} > {}", produced, ceiling);
    });
}

/// *For any* fixed-delay strategy, every attempt within budget waits the
/// same duration.
#[test]
fn property_fixed_delay_is_constant() {
    proptest!(|(delay_ms in 1u64..5_000, max_attempts in 1u32..20, attempt in 1u32..20)| {
        let strategy = FixedDelay::new(Duration::from_millis(delay_ms), max_attempts);

        let delay = strategy.next_delay(attempt);
        if attempt <= max_attempts {
            prop_assert_eq!(delay, Some(Duration::from_millis(delay_ms)));
        } else {
            prop_assert_eq!(delay, None);
        }
    });
}
