//! # Web Surface
//!
//! HTTP integration of the health checks: the Axum middleware and the response
//! types it produces.

pub mod middleware;
pub mod response_types;

pub use middleware::{health_check_middleware, with_health_checks};
pub use response_types::{HealthBody, HealthResponse, OK_BODY};
