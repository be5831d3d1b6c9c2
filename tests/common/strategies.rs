use proptest::prelude::*;

/// Quiet periods from one millisecond up to a day
pub fn quiet_period_ms_strategy() -> impl Strategy<Value = u64> {
    1u64..=86_400_000
}

/// Elapsed time relative to a quiet period: below, exactly at, or above it
pub fn elapsed_around_strategy(quiet_period_ms: u64) -> impl Strategy<Value = u64> {
    prop_oneof![
        0..quiet_period_ms,
        Just(quiet_period_ms),
        (quiet_period_ms + 1)..=(quiet_period_ms * 2 + 1),
    ]
}

/// Durations up to about three years in milliseconds
pub fn age_ms_strategy() -> impl Strategy<Value = u64> {
    0u64..100_000_000_000
}
