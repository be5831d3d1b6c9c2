#![allow(clippy::doc_markdown)] // Allow technical terms like PubSub, HTTP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # PubSub Health Checks
//!
//! Liveness and readiness health checks for HTTP services, with monitoring of
//! message-queue subscriptions for inactivity.
//!
//! ## Overview
//!
//! A service exposes up to three health aspects: `healthy` (the legacy aggregate at
//! `/_ah/health`), `alive` and `ready`. Each is an [`Endpoint`] whose state is
//! either valid or carries a failure that becomes the HTTP response.
//!
//! Subscriptions registered with
//! [`HealthChecks::start_monitor_pubsub_subscription`] are watched for silence. A
//! subscription that stays quiet longer than its quiet period marks the service
//! unhealthy and dead; an optional restart handler may replace it with a fresh
//! subscription instead.
//!
//! ## Module Organization
//!
//! - [`endpoint`] - Endpoint state and health failures
//! - [`subscription`] - Subscription contract, quiet-period monitor, restart handshake
//! - [`health_checks`] - The orchestrator running the composite check
//! - [`web`] - Axum middleware and HTTP responses
//! - [`config`] - Configuration with file and environment layering
//! - [`logging`] - Structured logging and the injected logger
//! - [`error`] - Structured error handling
//! - [`utils`] - Age formatting and subscription capability check
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use health_checks::web::with_health_checks;
//! use health_checks::HealthChecks;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let checks = HealthChecks::updated();
//! let app = with_health_checks(Router::new().route("/", get(|| async { "hello" })), checks);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod health_checks;
pub mod logging;
pub mod subscription;
pub mod utils;
pub mod web;

pub use config::{load_config, EndpointConfig, EndpointSetting, HealthChecksConfig};
pub use endpoint::{Endpoint, EndpointMatch, EndpointState, HealthError, HealthFailure};
pub use error::{HealthCheckError, Result, SubscriptionCheckError};
pub use health_checks::{default_legacy_check, default_updated_check, HealthChecks};
pub use logging::{HealthLogger, MemoryLogger, TracingLogger};
pub use subscription::{
    restart_handler, BoxError, Message, PubSubSubscription, Subscription, SubscriptionMonitor,
    SubscriptionRestarter,
};
pub use utils::{age_of_message, format_age, is_pubsub_subscription};
pub use web::{health_check_middleware, HealthResponse};
