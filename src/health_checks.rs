//! # Health Checks Orchestrator
//!
//! [`HealthChecks`] owns the `healthy`, `alive` and `ready` endpoints and the
//! monitors of every watched subscription. Each request runs the composite check:
//!
//! 1. every monitor is checked concurrently and the orchestrator waits for all of them
//! 2. monitors that need a restart run the restart handshake to completion
//! 3. the first unresolved failure (in monitoring order) marks `healthy` and `alive`
//! 4. the request path is matched against the endpoints in priority order
//!
//! `HealthChecks` is a cheap handle (`Arc` inside) so it can be shared as Axum state.
//!
//! ```rust,no_run
//! use health_checks::HealthChecks;
//! use health_checks::subscription::PubSubSubscription;
//! use std::sync::Arc;
//!
//! # async fn example() -> health_checks::Result<()> {
//! let checks = HealthChecks::updated();
//! let subscription = Arc::new(PubSubSubscription::new("orders-sub", "projects/shop"));
//! checks.start_monitor_pubsub_subscription(subscription, None, None)?;
//!
//! let response = checks.handle("/liveness_check").await;
//! assert!(response.is_some());
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthChecksConfig;
use crate::endpoint::{Endpoint, EndpointMatch, HealthError, HealthFailure};
use crate::error::{HealthCheckError, Result, SubscriptionCheckError};
use crate::logging::{HealthLogger, TracingLogger};
use crate::subscription::{
    CheckOutcome, EventKind, ListenerId, MonitorSnapshot, RestartOutcome, Subscription,
    SubscriptionEvent, SubscriptionKey, SubscriptionMonitor, SubscriptionRestarter,
};
use crate::utils::subscription_capability_gap;
use crate::web::HealthResponse;

pub const HEALTHY: &str = "healthy";
pub const ALIVE: &str = "alive";
pub const READY: &str = "ready";

static DEFAULT_LEGACY_CHECK: OnceLock<HealthChecks> = OnceLock::new();
static DEFAULT_UPDATED_CHECK: OnceLock<HealthChecks> = OnceLock::new();

/// Process-wide health checks with the legacy `/_ah/health` endpoint only
pub fn default_legacy_check() -> &'static HealthChecks {
    DEFAULT_LEGACY_CHECK.get_or_init(HealthChecks::legacy)
}

/// Process-wide health checks with the liveness and readiness endpoints
pub fn default_updated_check() -> &'static HealthChecks {
    DEFAULT_UPDATED_CHECK.get_or_init(HealthChecks::updated)
}

struct MonitorEntry {
    key: SubscriptionKey,
    monitor: Arc<SubscriptionMonitor>,
    /// Orchestrator-level transport error listener on the monitored subscription
    error_listener: ListenerId,
}

impl MonitorEntry {
    fn detach(&self) {
        self.monitor.stop_listening();
        self.monitor.subscription().remove_listener(self.error_listener);
    }
}

struct Inner {
    healthy: Endpoint,
    alive: Endpoint,
    ready: Endpoint,
    monitors: RwLock<Vec<MonitorEntry>>,
    default_quiet_period: Duration,
    verbose_error_responses: AtomicBool,
    logger: Arc<dyn HealthLogger>,
    /// Quiet-period failure last written into `healthy` and `alive`
    subscription_failure: Mutex<Option<HealthError>>,
}

impl Inner {
    fn set_unhealthy_dead(&self, error: HealthError) {
        self.healthy.set_error(error.clone());
        self.alive.set_error(error);
    }

    fn is_current(&self, monitor: &Arc<SubscriptionMonitor>) -> bool {
        self.monitors
            .read()
            .iter()
            .any(|entry| Arc::ptr_eq(&entry.monitor, monitor))
    }

    /// Swap `old` for `replacement` in place, keeping its position
    ///
    /// Returns false when `old` is no longer registered, in which case the
    /// replacement is dropped and stops listening.
    fn replace_entry(
        self: &Arc<Self>,
        old: &Arc<SubscriptionMonitor>,
        replacement: Arc<SubscriptionMonitor>,
    ) -> bool {
        let mut monitors = self.monitors.write();
        let Some(index) = monitors
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.monitor, old))
        else {
            return false;
        };

        monitors[index].detach();
        let key = replacement.key();
        if monitors.iter().any(|entry| entry.key == key) {
            // Already monitored under its own entry
            monitors.remove(index);
            return true;
        }

        let error_listener = attach_error_listener(self, replacement.subscription());
        monitors[index] = MonitorEntry {
            key,
            monitor: replacement,
            error_listener,
        };
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.monitors.get_mut().drain(..) {
            entry.detach();
        }
    }
}

fn attach_error_listener(inner: &Arc<Inner>, subscription: &Arc<dyn Subscription>) -> ListenerId {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let name = subscription.name().to_string();

    subscription.add_listener(
        EventKind::Error,
        Arc::new(move |event: &SubscriptionEvent| {
            let SubscriptionEvent::Error(failure) = event else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner
                .logger
                .error(&format!("Received error (sub: {name}): {failure}"));
            inner.set_unhealthy_dead(HealthError::Failure(failure.clone()));
        }),
    )
}

/// Liveness and readiness health checks with subscription monitoring
#[derive(Clone)]
pub struct HealthChecks {
    inner: Arc<Inner>,
}

impl HealthChecks {
    pub fn new(config: &HealthChecksConfig) -> Result<Self> {
        Self::with_logger(config, Arc::new(TracingLogger::default()))
    }

    /// Build from a configuration with an injected logger
    pub fn with_logger(config: &HealthChecksConfig, logger: Arc<dyn HealthLogger>) -> Result<Self> {
        config.validate()?;

        let healthy = Endpoint::with_initial_value(
            HEALTHY,
            Some(config.health_path()),
            config.health_initial_value(),
        )?;
        let alive = Endpoint::with_initial_value(
            ALIVE,
            config.liveness_path(),
            config.liveness_initial_value(),
        )?;
        let ready = Endpoint::with_initial_value(
            READY,
            config.readiness_path(),
            config.readiness_initial_value(),
        )?;

        Ok(Self::assemble(config, logger, [healthy, alive, ready]))
    }

    /// Legacy checks: `healthy` at `/_ah/health`
    pub fn legacy() -> Self {
        Self::from_defaults(&HealthChecksConfig::default())
    }

    /// Updated checks: legacy endpoint plus `/liveness_check` and `/readiness_check`
    pub fn updated() -> Self {
        Self::from_defaults(&HealthChecksConfig::default().with_updated_health_checks(true))
    }

    fn from_defaults(config: &HealthChecksConfig) -> Self {
        let endpoints = [
            Endpoint::new(HEALTHY, Some(config.health_path())),
            Endpoint::new(ALIVE, config.liveness_path()),
            Endpoint::new(READY, config.readiness_path()),
        ];
        Self::assemble(config, Arc::new(TracingLogger::default()), endpoints)
    }

    fn assemble(
        config: &HealthChecksConfig,
        logger: Arc<dyn HealthLogger>,
        [healthy, alive, ready]: [Endpoint; 3],
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                healthy,
                alive,
                ready,
                monitors: RwLock::new(Vec::new()),
                default_quiet_period: config.default_quiet_period(),
                verbose_error_responses: AtomicBool::new(config.resolve_verbose_error_responses()),
                logger,
                subscription_failure: Mutex::new(None),
            }),
        }
    }

    pub fn healthy(&self) -> &Endpoint {
        &self.inner.healthy
    }

    pub fn alive(&self) -> &Endpoint {
        &self.inner.alive
    }

    pub fn ready(&self) -> &Endpoint {
        &self.inner.ready
    }

    /// Endpoints in the order requests are matched against them
    pub fn endpoints(&self) -> [&Endpoint; 3] {
        [&self.inner.healthy, &self.inner.alive, &self.inner.ready]
    }

    pub fn default_quiet_period(&self) -> Duration {
        self.inner.default_quiet_period
    }

    pub fn verbose_error_responses(&self) -> bool {
        self.inner.verbose_error_responses.load(Ordering::Relaxed)
    }

    pub fn set_verbose_error_responses(&self, verbose: bool) {
        self.inner
            .verbose_error_responses
            .store(verbose, Ordering::Relaxed);
    }

    pub fn set_healthy(&self) {
        self.inner.healthy.set_valid();
    }

    pub fn set_unhealthy(&self, error: impl Into<HealthError>) {
        self.inner.healthy.set_error(error);
    }

    pub fn set_unhealthy_value(&self, value: Value) -> Result<()> {
        self.inner.healthy.set_error_value(value)
    }

    pub fn set_alive(&self) {
        self.inner.alive.set_valid();
    }

    pub fn set_dead(&self, error: impl Into<HealthError>) {
        self.inner.alive.set_error(error);
    }

    pub fn set_dead_value(&self, value: Value) -> Result<()> {
        self.inner.alive.set_error_value(value)
    }

    pub fn set_ready(&self) {
        self.inner.ready.set_valid();
    }

    pub fn set_unready(&self, error: impl Into<HealthError>) {
        self.inner.ready.set_error(error);
    }

    pub fn set_unready_value(&self, value: Value) -> Result<()> {
        self.inner.ready.set_error_value(value)
    }

    /// Start watching a subscription for inactivity
    ///
    /// `quiet_period` defaults to the configured one. Monitoring an already watched
    /// subscription is a no-op. Besides the quiet-period check, any transport error
    /// the subscription emits marks `healthy` and `alive` as failed.
    pub fn start_monitor_pubsub_subscription(
        &self,
        subscription: Arc<dyn Subscription>,
        quiet_period: Option<Duration>,
        restart_handler: Option<Arc<dyn SubscriptionRestarter>>,
    ) -> Result<()> {
        if let Some(reason) = subscription_capability_gap(&*subscription) {
            return Err(HealthCheckError::not_a_subscription(reason));
        }

        let key = SubscriptionKey::of(&subscription);
        let mut monitors = self.inner.monitors.write();
        if monitors.iter().any(|entry| entry.key == key) {
            return Ok(());
        }

        self.inner.logger.debug(&format!(
            "Start monitoring subscription: {}",
            subscription.name()
        ));

        let monitor = Arc::new(SubscriptionMonitor::new(
            Arc::clone(&subscription),
            quiet_period.unwrap_or(self.inner.default_quiet_period),
            restart_handler,
            Arc::clone(&self.inner.logger),
        ));
        monitor.start_listening();
        let error_listener = attach_error_listener(&self.inner, &subscription);

        monitors.push(MonitorEntry {
            key,
            monitor,
            error_listener,
        });
        Ok(())
    }

    /// Stop watching a subscription; a no-op when it is not watched
    pub fn stop_monitor_pubsub_subscription(&self, subscription: &dyn Subscription) -> Result<()> {
        if let Some(reason) = subscription_capability_gap(subscription) {
            return Err(HealthCheckError::not_a_subscription(reason));
        }

        let key = SubscriptionKey::of_ref(subscription);
        let mut monitors = self.inner.monitors.write();
        let Some(index) = monitors.iter().position(|entry| entry.key == key) else {
            return Ok(());
        };

        self.inner.logger.debug(&format!(
            "Stop monitoring subscription: {}",
            subscription.name()
        ));
        monitors.remove(index).detach();
        Ok(())
    }

    pub fn is_monitoring(&self, subscription: &dyn Subscription) -> bool {
        let key = SubscriptionKey::of_ref(subscription);
        self.inner.monitors.read().iter().any(|entry| entry.key == key)
    }

    pub fn monitored_count(&self) -> usize {
        self.inner.monitors.read().len()
    }

    /// Monitored subscriptions, in monitoring order
    pub fn monitored_subscriptions(&self) -> Vec<Arc<dyn Subscription>> {
        self.inner
            .monitors
            .read()
            .iter()
            .map(|entry| Arc::clone(entry.monitor.subscription()))
            .collect()
    }

    pub fn monitor_snapshots(&self) -> Vec<MonitorSnapshot> {
        let now = Instant::now();
        self.inner
            .monitors
            .read()
            .iter()
            .map(|entry| entry.monitor.snapshot(now))
            .collect()
    }

    /// Check every monitored subscription and fold the result into endpoint state
    ///
    /// Returns the failure that was reported, if any.
    pub async fn check_subscriptions(&self) -> Option<SubscriptionCheckError> {
        let monitors: Vec<Arc<SubscriptionMonitor>> = self
            .inner
            .monitors
            .read()
            .iter()
            .map(|entry| Arc::clone(&entry.monitor))
            .collect();
        if monitors.is_empty() {
            self.reconcile(None);
            return None;
        }

        let now = Instant::now();
        let results = join_all(
            monitors
                .iter()
                .map(|monitor| self.check_monitor(monitor, now)),
        )
        .await;

        let failure = results.into_iter().flatten().next();
        self.reconcile(failure.clone());
        failure
    }

    async fn check_monitor(
        &self,
        monitor: &Arc<SubscriptionMonitor>,
        now: Instant,
    ) -> Option<SubscriptionCheckError> {
        match monitor.check(now) {
            CheckOutcome::Passed => None,
            CheckOutcome::Failed(err) => Some(err),
            CheckOutcome::NeedsRestart(err) => self.restart_monitor(monitor, err).await,
        }
    }

    async fn restart_monitor(
        &self,
        monitor: &Arc<SubscriptionMonitor>,
        check_error: SubscriptionCheckError,
    ) -> Option<SubscriptionCheckError> {
        let _restart = monitor.restart_lock().lock().await;
        // Replaced or stopped while waiting for a concurrent restart
        if !self.inner.is_current(monitor) {
            return None;
        }

        let outcome = monitor.restart().await;
        if !self.inner.is_current(monitor) {
            // Stopped while the handler was running; a replacement is dropped with the outcome
            monitor.stop_listening();
            self.inner.logger.debug(&format!(
                "Subscription {} stopped during restart, outcome discarded",
                monitor.subscription_name()
            ));
            return None;
        }

        match outcome {
            RestartOutcome::Replaced(replacement) => {
                if !self.inner.replace_entry(monitor, replacement) {
                    self.inner.logger.debug(&format!(
                        "Subscription {} stopped during restart, replacement discarded",
                        monitor.subscription_name()
                    ));
                }
                None
            }
            RestartOutcome::Unrecovered => Some(check_error),
            RestartOutcome::Failed(restart_error) => Some(restart_error),
        }
    }

    fn reconcile(&self, failure: Option<SubscriptionCheckError>) {
        let mut reported = self.inner.subscription_failure.lock();
        match failure {
            Some(err) => {
                let error = HealthError::Failure(HealthFailure::from(err));
                self.inner.set_unhealthy_dead(error.clone());
                *reported = Some(error);
            }
            None => {
                if let Some(previous) = reported.take() {
                    self.inner.healthy.clear_if(&previous);
                    self.inner.alive.clear_if(&previous);
                }
            }
        }
    }

    /// Run the composite check and answer `path` if an endpoint serves it
    ///
    /// `None` means no endpoint matched and the request belongs to the next handler.
    pub async fn handle(&self, path: &str) -> Option<HealthResponse> {
        self.check_subscriptions().await;

        let verbose = self.verbose_error_responses();
        for endpoint in self.endpoints() {
            match endpoint.evaluate(path) {
                EndpointMatch::NotMatched => continue,
                EndpointMatch::Healthy => return Some(HealthResponse::ok()),
                EndpointMatch::Failed(failure) => {
                    self.inner.logger.debug(&format!(
                        "Health check {} failed: {failure}",
                        endpoint.name()
                    ));
                    return Some(HealthResponse::failure(&failure, verbose));
                }
            }
        }
        None
    }
}

impl Default for HealthChecks {
    fn default() -> Self {
        Self::legacy()
    }
}

impl fmt::Display for HealthChecks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints: Vec<String> = self
            .endpoints()
            .iter()
            .filter(|endpoint| endpoint.path().is_some())
            .map(ToString::to_string)
            .collect();
        let now = Instant::now();
        let subscriptions: Vec<String> = self
            .inner
            .monitors
            .read()
            .iter()
            .map(|entry| {
                let snapshot = entry.monitor.snapshot(now);
                format!("{}: {:?}", snapshot.subscription, snapshot.state)
            })
            .collect();

        write!(
            f,
            "HealthChecks {{ {}, subscriptions: [{}] }}",
            endpoints.join(", "),
            subscriptions.join(", ")
        )
    }
}

impl fmt::Debug for HealthChecks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecks")
            .field("healthy", &self.inner.healthy)
            .field("alive", &self.inner.alive)
            .field("ready", &self.inner.ready)
            .field("monitored", &self.monitored_count())
            .field("verbose_error_responses", &self.verbose_error_responses())
            .finish()
    }
}
