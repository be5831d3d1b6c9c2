//! # Error Types
//!
//! Configuration-class errors raised synchronously at the API boundary, and the
//! staleness/restart errors produced by subscription checks. Health state itself
//! is data (see [`crate::endpoint::HealthError`]) and never travels through here.

use thiserror::Error;

use crate::endpoint::HealthFailure;

/// Errors returned by the public API for programmer-error inputs
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("Not allowed to set {endpoint} with {value} error")]
    InvalidErrorValue { endpoint: String, value: String },

    #[error("Not a PubSub subscription object: {reason}")]
    NotASubscription { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),
}

impl HealthCheckError {
    /// Create an invalid endpoint error value error
    pub fn invalid_error_value(endpoint: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidErrorValue {
            endpoint: endpoint.into(),
            value: value.into(),
        }
    }

    /// Create a non-conforming subscription error
    pub fn not_a_subscription(reason: impl Into<String>) -> Self {
        Self::NotASubscription {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HealthCheckError>;

/// Failures detected while checking a monitored subscription
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionCheckError {
    #[error("Not yet started listening to subscription ({subscription})")]
    NotListening { subscription: String },

    #[error("Subscription {subscription} has never received a message")]
    NeverReceived { subscription: String },

    #[error("Subscription {subscription} has not received a message for {age}")]
    Stale { subscription: String, age: String },

    #[error("Failed to re-create subscription {subscription}: {source_message}")]
    RestartFailed {
        subscription: String,
        source_message: String,
    },
}

impl SubscriptionCheckError {
    /// Name of the subscription the failure belongs to
    pub fn subscription(&self) -> &str {
        match self {
            Self::NotListening { subscription }
            | Self::NeverReceived { subscription }
            | Self::Stale { subscription, .. }
            | Self::RestartFailed { subscription, .. } => subscription,
        }
    }

    /// Short machine-readable kind, attached to the health failure
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotListening { .. } => "not_listening",
            Self::NeverReceived { .. } => "never_received",
            Self::Stale { .. } => "stale",
            Self::RestartFailed { .. } => "restart_failed",
        }
    }
}

impl From<SubscriptionCheckError> for HealthFailure {
    fn from(err: SubscriptionCheckError) -> Self {
        HealthFailure::new(err.to_string())
            .with_property("subscription", err.subscription())
            .with_property("reason", err.kind())
    }
}
