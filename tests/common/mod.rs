#![allow(dead_code)]

pub mod strategies;

use axum::body::{to_bytes, Body};
use axum::response::Response;
use health_checks::config::HealthChecksConfig;
use health_checks::subscription::{
    restart_handler, BoxError, Message, PubSubSubscription, Subscription, SubscriptionRestarter,
};
use health_checks::{HealthChecks, MemoryLogger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const CLIENT: &str = "projects/test-project";

pub fn subscription(name: &str) -> Arc<PubSubSubscription> {
    Arc::new(PubSubSubscription::new(name, CLIENT))
}

pub fn message(id: &str) -> Message {
    Message::new(id)
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Health checks with a recording logger and the given quiet period
pub fn checks_with_logger(updated: bool, quiet_period_ms: u64) -> (HealthChecks, Arc<MemoryLogger>) {
    let config = HealthChecksConfig::default()
        .with_updated_health_checks(updated)
        .with_default_max_subscription_quiet_period_ms(quiet_period_ms)
        .with_verbose_error_responses(false);
    let logger = Arc::new(MemoryLogger::new());
    let checks = HealthChecks::with_logger(&config, logger.clone()).expect("valid config");
    (checks, logger)
}

/// Restart handler that always hands back the subscription it was given
pub fn same_subscription_handler(calls: Arc<AtomicUsize>) -> Arc<dyn SubscriptionRestarter> {
    restart_handler(move |old: Arc<dyn Subscription>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(Some(old))
        }
    })
}

/// Restart handler that creates a fresh subscription with the same name
pub fn fresh_subscription_handler(calls: Arc<AtomicUsize>) -> Arc<dyn SubscriptionRestarter> {
    restart_handler(move |old: Arc<dyn Subscription>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let fresh: Arc<dyn Subscription> = Arc::new(PubSubSubscription::new(old.name(), CLIENT));
            Ok::<_, BoxError>(Some(fresh))
        }
    })
}

/// Like [`fresh_subscription_handler`], but the replacement takes `delay` to create
pub fn slow_fresh_subscription_handler(
    calls: Arc<AtomicUsize>,
    delay: Duration,
) -> Arc<dyn SubscriptionRestarter> {
    restart_handler(move |old: Arc<dyn Subscription>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            let fresh: Arc<dyn Subscription> = Arc::new(PubSubSubscription::new(old.name(), CLIENT));
            Ok::<_, BoxError>(Some(fresh))
        }
    })
}

/// Restart handler that hands back the old subscription once `gate` is notified
pub fn gated_same_subscription_handler(
    calls: Arc<AtomicUsize>,
    gate: Arc<Notify>,
) -> Arc<dyn SubscriptionRestarter> {
    restart_handler(move |old: Arc<dyn Subscription>| {
        let calls = calls.clone();
        let gate = gate.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok::<_, BoxError>(Some(old))
        }
    })
}

/// Restart handler that always fails
pub fn failing_handler(reason: &'static str) -> Arc<dyn SubscriptionRestarter> {
    restart_handler(move |_old: Arc<dyn Subscription>| async move {
        Err::<Option<Arc<dyn Subscription>>, BoxError>(reason.into())
    })
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
