//! # Subscription Quiet-Period Monitor
//!
//! Watches one subscription for message inactivity. The monitor records when it
//! started listening and when the last message arrived (local arrival time, never
//! the broker's publish stamp), and a check fails once the silence is strictly longer
//! than the quiet period.
//!
//! ```text
//! NotListening -> ListeningNoMessage -> ListeningWithMessage
//!                         \                    /
//!                          +-- check failed --+--> (restart handler?) Restarting
//! ```
//!
//! Repeated checks that keep finding the same unresolved failure log it once at
//! error level and afterwards at warn level, until a check passes again.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::restart::SubscriptionRestarter;
use super::{EventKind, Listener, ListenerId, Subscription, SubscriptionEvent, SubscriptionKey};
use crate::endpoint::HealthFailure;
use crate::error::SubscriptionCheckError;
use crate::logging::HealthLogger;
use crate::utils::{age_of_message, format_age};

/// Observable lifecycle state of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NotListening,
    ListeningNoMessage,
    ListeningWithMessage,
}

/// Result of one check
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Passed,
    Failed(SubscriptionCheckError),
    /// Failed, and a restart handler is available to attempt recovery
    NeedsRestart(SubscriptionCheckError),
}

impl CheckOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed)
    }
}

/// Result of a restart handshake
pub enum RestartOutcome {
    /// The handler produced a different subscription, already being monitored
    Replaced(Arc<SubscriptionMonitor>),
    /// The handler produced nothing new; the original failure stands
    Unrecovered,
    /// The handler itself failed
    Failed(SubscriptionCheckError),
}

impl fmt::Debug for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartOutcome::Replaced(monitor) => f
                .debug_tuple("Replaced")
                .field(&monitor.subscription_name())
                .finish(),
            RestartOutcome::Unrecovered => f.write_str("Unrecovered"),
            RestartOutcome::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Diagnostic view of a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub subscription: String,
    pub state: MonitorState,
    pub quiet_period_ms: u64,
    pub since_started_listening_ms: Option<u64>,
    pub since_last_message_ms: Option<u64>,
    pub messages_received: u64,
    pub last_error: Option<String>,
    pub has_restart_handler: bool,
}

#[derive(Debug, Default)]
struct Observations {
    started_listening_at: Option<Instant>,
    last_message_at: Option<Instant>,
    messages_received: u64,
    last_error: Option<HealthFailure>,
}

/// Quiet-period monitor for one subscription
pub struct SubscriptionMonitor {
    subscription: Arc<dyn Subscription>,
    quiet_period: Duration,
    restart_handler: Option<Arc<dyn SubscriptionRestarter>>,
    logger: Arc<dyn HealthLogger>,
    observations: Arc<Mutex<Observations>>,
    listeners: Mutex<Option<(ListenerId, ListenerId)>>,
    failure_reported: AtomicBool,
    restart_lock: tokio::sync::Mutex<()>,
}

impl SubscriptionMonitor {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        quiet_period: Duration,
        restart_handler: Option<Arc<dyn SubscriptionRestarter>>,
        logger: Arc<dyn HealthLogger>,
    ) -> Self {
        Self {
            subscription,
            quiet_period,
            restart_handler,
            logger,
            observations: Arc::new(Mutex::new(Observations::default())),
            listeners: Mutex::new(None),
            failure_reported: AtomicBool::new(false),
            restart_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A fresh monitor for a replacement subscription with the same settings
    fn for_replacement(&self, subscription: Arc<dyn Subscription>) -> Self {
        Self::new(
            subscription,
            self.quiet_period,
            self.restart_handler.clone(),
            Arc::clone(&self.logger),
        )
    }

    pub fn subscription(&self) -> &Arc<dyn Subscription> {
        &self.subscription
    }

    pub fn subscription_name(&self) -> &str {
        self.subscription.name()
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::of(&self.subscription)
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn has_restart_handler(&self) -> bool {
        self.restart_handler.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listeners.lock().is_some()
    }

    pub fn started_listening_at(&self) -> Option<Instant> {
        self.observations.lock().started_listening_at
    }

    pub fn last_message_at(&self) -> Option<Instant> {
        self.observations.lock().last_message_at
    }

    /// Last transport-level error seen; advisory only
    pub fn last_error(&self) -> Option<HealthFailure> {
        self.observations.lock().last_error.clone()
    }

    pub fn state(&self) -> MonitorState {
        if !self.is_listening() {
            return MonitorState::NotListening;
        }
        if self.observations.lock().last_message_at.is_some() {
            MonitorState::ListeningWithMessage
        } else {
            MonitorState::ListeningNoMessage
        }
    }

    pub(crate) fn restart_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.restart_lock
    }

    /// Attach the message and error observers
    ///
    /// The start time is recorded on the first call only; listening again after a
    /// stop keeps the recorded timestamps.
    pub fn start_listening(&self) {
        let mut listeners = self.listeners.lock();
        if listeners.is_some() {
            self.logger.debug(&format!(
                "Already listening to subscription {}",
                self.subscription_name()
            ));
            return;
        }

        let message_id = self
            .subscription
            .add_listener(EventKind::Message, self.message_listener());
        let error_id = self
            .subscription
            .add_listener(EventKind::Error, self.error_listener());
        *listeners = Some((message_id, error_id));

        let mut observations = self.observations.lock();
        if observations.started_listening_at.is_none() {
            observations.started_listening_at = Some(Instant::now());
        }
    }

    /// Detach the observers; recorded timestamps are kept for diagnostics
    pub fn stop_listening(&self) {
        if let Some((message_id, error_id)) = self.listeners.lock().take() {
            self.subscription.remove_listener(message_id);
            self.subscription.remove_listener(error_id);
        }
    }

    fn message_listener(&self) -> Listener {
        let observations = Arc::clone(&self.observations);
        let logger = Arc::clone(&self.logger);
        let name = self.subscription_name().to_string();

        Arc::new(move |event: &SubscriptionEvent| {
            let SubscriptionEvent::Message(message) = event else {
                return;
            };
            let age = age_of_message(message, Utc::now()).unwrap_or_else(|| "unknown".to_string());
            logger.debug(&format!(
                "Received message (sub: {name}) age - {age} [id={}]",
                message.id
            ));

            let now = Instant::now();
            let mut observations = observations.lock();
            observations.last_message_at = Some(match observations.last_message_at {
                Some(previous) if previous > now => previous,
                _ => now,
            });
            observations.messages_received += 1;
        })
    }

    fn error_listener(&self) -> Listener {
        let observations = Arc::clone(&self.observations);
        let logger = Arc::clone(&self.logger);
        let name = self.subscription_name().to_string();

        Arc::new(move |event: &SubscriptionEvent| {
            let SubscriptionEvent::Error(error) = event else {
                return;
            };
            logger.debug(&format!("Received error (sub: {name}): {error}"));
            observations.lock().last_error = Some(error.clone());
        })
    }

    /// Evaluate the quiet period at `now` without logging
    ///
    /// Elapsed time equal to the quiet period passes; only strictly longer fails.
    pub fn evaluate(&self, now: Instant) -> Result<(), SubscriptionCheckError> {
        let observations = self.observations.lock();
        let subscription = self.subscription_name().to_string();

        let Some(started) = observations.started_listening_at else {
            return Err(SubscriptionCheckError::NotListening { subscription });
        };

        match observations.last_message_at {
            None => {
                if now.saturating_duration_since(started) > self.quiet_period {
                    return Err(SubscriptionCheckError::NeverReceived { subscription });
                }
            }
            Some(last_message) => {
                let since_message = now.saturating_duration_since(last_message);
                if since_message > self.quiet_period {
                    return Err(SubscriptionCheckError::Stale {
                        subscription,
                        age: format_age(since_message),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check the subscription, logging the outcome with de-duplication
    pub fn check(&self, now: Instant) -> CheckOutcome {
        match self.evaluate(now) {
            Ok(()) => {
                if self.failure_reported.swap(false, Ordering::SeqCst) {
                    self.logger.info(&format!(
                        "Subscription {} is receiving messages again",
                        self.subscription_name()
                    ));
                }
                CheckOutcome::Passed
            }
            Err(err) => {
                if self.failure_reported.swap(true, Ordering::SeqCst) {
                    self.logger.warn(&format!("{err} (already reported)"));
                } else {
                    self.logger.error(&format!(
                        "Subscription alive check failed: {err} [{}]",
                        self.describe(now)
                    ));
                }

                if self.restart_handler.is_some() {
                    CheckOutcome::NeedsRestart(err)
                } else {
                    CheckOutcome::Failed(err)
                }
            }
        }
    }

    /// Run the restart handshake
    ///
    /// Stops listening, asks the handler for a replacement, and either hands back a
    /// started monitor bound to the replacement or resumes listening on the old
    /// subscription. Callers serialise restarts through [`Self::restart_lock`].
    pub async fn restart(&self) -> RestartOutcome {
        let Some(handler) = self.restart_handler.clone() else {
            return RestartOutcome::Unrecovered;
        };
        let name = self.subscription_name().to_string();

        self.logger.info(&format!("Re-creating subscription {name}"));
        self.stop_listening();

        match handler.restart(Arc::clone(&self.subscription)).await {
            Ok(Some(replacement)) if SubscriptionKey::of(&replacement) != self.key() => {
                let monitor = Arc::new(self.for_replacement(replacement));
                monitor.start_listening();
                self.logger.info(&format!(
                    "Subscription {name} replaced by {}",
                    monitor.subscription_name()
                ));
                RestartOutcome::Replaced(monitor)
            }
            Ok(_) => {
                self.logger.warn(&format!(
                    "Restart handler did not replace subscription {name}"
                ));
                self.start_listening();
                RestartOutcome::Unrecovered
            }
            Err(err) => {
                self.logger
                    .error(&format!("Failed to re-create subscription {name}: {err}"));
                self.start_listening();
                RestartOutcome::Failed(SubscriptionCheckError::RestartFailed {
                    subscription: name,
                    source_message: err.to_string(),
                })
            }
        }
    }

    pub fn snapshot(&self, now: Instant) -> MonitorSnapshot {
        let state = self.state();
        let observations = self.observations.lock();
        let millis_since = |instant: Option<Instant>| {
            instant.map(|at| now.saturating_duration_since(at).as_millis() as u64)
        };

        MonitorSnapshot {
            subscription: self.subscription_name().to_string(),
            state,
            quiet_period_ms: self.quiet_period.as_millis() as u64,
            since_started_listening_ms: millis_since(observations.started_listening_at),
            since_last_message_ms: millis_since(observations.last_message_at),
            messages_received: observations.messages_received,
            last_error: observations.last_error.as_ref().map(ToString::to_string),
            has_restart_handler: self.restart_handler.is_some(),
        }
    }

    fn describe(&self, now: Instant) -> String {
        let snapshot = self.snapshot(now);
        let last_message = snapshot
            .since_last_message_ms
            .map(|ms| format!("{} ago", format_age(Duration::from_millis(ms))))
            .unwrap_or_else(|| "never".to_string());
        format!(
            "quiet period {}, last message {last_message}, {} received",
            format_age(self.quiet_period),
            snapshot.messages_received
        )
    }
}

impl fmt::Debug for SubscriptionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMonitor")
            .field("subscription", &self.subscription_name())
            .field("quiet_period", &self.quiet_period)
            .field("state", &self.state())
            .field("has_restart_handler", &self.has_restart_handler())
            .finish()
    }
}

impl Drop for SubscriptionMonitor {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogger, TracingLogger};
    use crate::subscription::{restart_handler, BoxError, Message, PubSubSubscription};
    use tracing::Level;

    fn subscription(name: &str) -> Arc<PubSubSubscription> {
        Arc::new(PubSubSubscription::new(name, "projects/test"))
    }

    fn monitor_for(sub: &Arc<PubSubSubscription>, quiet_ms: u64) -> SubscriptionMonitor {
        SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(quiet_ms),
            None,
            Arc::new(TracingLogger::default()),
        )
    }

    #[test]
    fn test_check_before_listening() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);

        assert_eq!(monitor.state(), MonitorState::NotListening);
        assert_eq!(
            monitor.evaluate(Instant::now()),
            Err(SubscriptionCheckError::NotListening {
                subscription: "sub".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_received_boundary() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);
        monitor.start_listening();
        let started = monitor.started_listening_at().unwrap();

        assert!(monitor.evaluate(started + Duration::from_millis(1000)).is_ok());
        assert_eq!(
            monitor.evaluate(started + Duration::from_millis(1001)),
            Err(SubscriptionCheckError::NeverReceived {
                subscription: "sub".to_string()
            })
        );
        assert!(monitor
            .evaluate(started + Duration::from_millis(1000) + Duration::from_nanos(1))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_boundary() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);
        monitor.start_listening();

        tokio::time::advance(Duration::from_millis(500)).await;
        sub.emit_message(Message::new("1"));
        let last = monitor.last_message_at().unwrap();
        assert_eq!(monitor.state(), MonitorState::ListeningWithMessage);

        assert!(monitor.evaluate(last + Duration::from_millis(1000)).is_ok());
        assert!(monitor.evaluate(last + Duration::from_micros(999_999)).is_ok());
        let err = monitor
            .evaluate(last + Duration::from_micros(1_000_001))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Subscription sub has not received a message for 1.000s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_advance_last_message() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);
        monitor.start_listening();

        sub.emit_message(Message::new("1"));
        let first = monitor.last_message_at().unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        sub.emit_message(Message::new("2").with_publish_time(Utc::now() - chrono::Duration::hours(1)));
        let second = monitor.last_message_at().unwrap();

        assert!(second > first);
        assert_eq!(monitor.snapshot(second).messages_received, 2);
    }

    #[test]
    fn test_error_event_is_advisory() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);
        monitor.start_listening();

        sub.emit_error("connection reset");

        assert_eq!(monitor.last_error(), Some(HealthFailure::new("connection reset")));
        assert!(monitor.evaluate(Instant::now()).is_ok());
    }

    #[test]
    fn test_listener_symmetry() {
        let sub = subscription("sub");
        let monitor = monitor_for(&sub, 1000);

        monitor.start_listening();
        monitor.start_listening();
        assert_eq!(sub.listener_count(EventKind::Message), 1);
        assert_eq!(sub.listener_count(EventKind::Error), 1);

        monitor.stop_listening();
        assert_eq!(sub.listener_count(EventKind::Message), 0);
        assert_eq!(sub.listener_count(EventKind::Error), 0);
        assert_eq!(monitor.state(), MonitorState::NotListening);
        assert!(monitor.started_listening_at().is_some());
    }

    #[test]
    fn test_drop_detaches_listeners() {
        let sub = subscription("sub");
        {
            let monitor = monitor_for(&sub, 1000);
            monitor.start_listening();
            assert_eq!(sub.listener_count(EventKind::Message), 1);
        }
        assert_eq!(sub.listener_count(EventKind::Message), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_logged_once_per_spell() {
        let sub = subscription("sub");
        let logger = Arc::new(MemoryLogger::new());
        let monitor = SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(1000),
            None,
            logger.clone(),
        );
        monitor.start_listening();

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!monitor.check(Instant::now()).is_passed());
        assert!(!monitor.check(Instant::now()).is_passed());
        assert!(!monitor.check(Instant::now()).is_passed());
        assert_eq!(logger.count(Level::ERROR), 1);
        assert_eq!(logger.count(Level::WARN), 2);

        sub.emit_message(Message::new("1"));
        assert!(monitor.check(Instant::now()).is_passed());

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!monitor.check(Instant::now()).is_passed());
        assert_eq!(logger.count(Level::ERROR), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_restart_with_handler() {
        let sub = subscription("sub");
        let handler = restart_handler(|_old: Arc<dyn Subscription>| async move {
            Ok::<Option<Arc<dyn Subscription>>, BoxError>(None)
        });
        let monitor = SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(1000),
            Some(handler),
            Arc::new(TracingLogger::default()),
        );
        monitor.start_listening();

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(matches!(
            monitor.check(Instant::now()),
            CheckOutcome::NeedsRestart(SubscriptionCheckError::NeverReceived { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_subscription() {
        let sub = subscription("sub");
        let fresh = subscription("sub-2");
        let handler = {
            let fresh = fresh.clone();
            restart_handler(move |_old: Arc<dyn Subscription>| {
                let fresh: Arc<dyn Subscription> = fresh.clone();
                async move { Ok::<_, BoxError>(Some(fresh)) }
            })
        };
        let monitor = SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(1000),
            Some(handler),
            Arc::new(TracingLogger::default()),
        );
        monitor.start_listening();

        let RestartOutcome::Replaced(replacement) = monitor.restart().await else {
            panic!("Expected replacement");
        };

        assert_eq!(sub.listener_count(EventKind::Message), 0);
        assert_eq!(fresh.listener_count(EventKind::Message), 1);
        assert_eq!(replacement.quiet_period(), Duration::from_millis(1000));
        assert!(replacement.has_restart_handler());
        assert_eq!(replacement.state(), MonitorState::ListeningNoMessage);
    }

    #[tokio::test]
    async fn test_restart_same_subscription_resumes_listening() {
        let sub = subscription("sub");
        let handler = restart_handler(|old: Arc<dyn Subscription>| async move {
            Ok::<_, BoxError>(Some(old))
        });
        let monitor = SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(1000),
            Some(handler),
            Arc::new(TracingLogger::default()),
        );
        monitor.start_listening();
        let started = monitor.started_listening_at();

        assert!(matches!(monitor.restart().await, RestartOutcome::Unrecovered));
        assert_eq!(sub.listener_count(EventKind::Message), 1);
        assert_eq!(monitor.started_listening_at(), started);
    }

    #[tokio::test]
    async fn test_restart_handler_failure() {
        let sub = subscription("sub");
        let handler = restart_handler(|_old: Arc<dyn Subscription>| async move {
            Err::<Option<Arc<dyn Subscription>>, BoxError>("quota exceeded".into())
        });
        let monitor = SubscriptionMonitor::new(
            sub.clone(),
            Duration::from_millis(1000),
            Some(handler),
            Arc::new(TracingLogger::default()),
        );
        monitor.start_listening();

        match monitor.restart().await {
            RestartOutcome::Failed(err) => assert_eq!(
                err.to_string(),
                "Failed to re-create subscription sub: quota exceeded"
            ),
            other => panic!("Expected failure, got {other:?}"),
        }
        assert!(monitor.is_listening());
    }
}
