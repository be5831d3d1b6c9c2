//! # Utilities
//!
//! Human-readable age formatting and the structural subscription capability check.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::subscription::{Message, Subscription};

const MINUTE_MS: u128 = 60 * 1000;
const HOUR_MS: u128 = 60 * MINUTE_MS;
const DAY_MS: u128 = 24 * HOUR_MS;

/// Format an elapsed duration with millisecond precision
///
/// Under 5 minutes the age is reported in seconds (`"12.345s"`), under 2 hours in
/// minutes and seconds (`"119m 59.000s"`), under a day in hours (`"23h 59m 59.000s"`),
/// and beyond that with days (`"1d 0h 0m 0.000s"`).
pub fn format_age(elapsed: Duration) -> String {
    // Round to the nearest millisecond
    let total_ms = (elapsed.as_nanos() + 500_000) / 1_000_000;

    let seconds = |ms: u128| format!("{}.{:03}s", ms / 1000, ms % 1000);

    if total_ms < 5 * MINUTE_MS {
        seconds(total_ms)
    } else if total_ms < 2 * HOUR_MS {
        format!("{}m {}", total_ms / MINUTE_MS, seconds(total_ms % MINUTE_MS))
    } else if total_ms < DAY_MS {
        format!(
            "{}h {}m {}",
            total_ms / HOUR_MS,
            (total_ms % HOUR_MS) / MINUTE_MS,
            seconds(total_ms % MINUTE_MS)
        )
    } else {
        format!(
            "{}d {}h {}m {}",
            total_ms / DAY_MS,
            (total_ms % DAY_MS) / HOUR_MS,
            (total_ms % HOUR_MS) / MINUTE_MS,
            seconds(total_ms % MINUTE_MS)
        )
    }
}

/// Age of a message relative to `now`, from its publish timestamp
///
/// Returns `None` when the message carries no publish time. A publish time in the
/// future (clock skew) is reported as zero.
pub fn age_of_message(message: &Message, now: DateTime<Utc>) -> Option<String> {
    let published = message.publish_time?;
    let elapsed = (now - published).to_std().unwrap_or(Duration::ZERO);
    Some(format_age(elapsed))
}

/// Whether an object satisfies the subscription capability contract
///
/// It must carry a non-empty name and be bound to a parent client.
pub fn is_pubsub_subscription(subscription: &dyn Subscription) -> bool {
    subscription_capability_gap(subscription).is_none()
}

/// Describes why an object fails the capability check, `None` when it passes
pub(crate) fn subscription_capability_gap(subscription: &dyn Subscription) -> Option<String> {
    if subscription.name().trim().is_empty() {
        return Some("subscription has no name".to_string());
    }
    match subscription.parent() {
        Some(parent) if !parent.trim().is_empty() => None,
        _ => Some(format!(
            "subscription {} is not bound to a client",
            subscription.name()
        )),
    }
}
