//! # Health Check Middleware
//!
//! Axum middleware that runs the composite health check for every request and
//! answers configured health paths itself. Unrelated paths pass through to the
//! next handler.

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::debug;

use crate::health_checks::HealthChecks;

/// Health check middleware, for use with `axum::middleware::from_fn_with_state`
pub async fn health_check_middleware(
    State(health_checks): State<HealthChecks>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match health_checks.handle(&path).await {
        Some(response) => {
            debug!(path = %path, status = %response.status(), "Answered health check");
            response.into_response()
        }
        None => next.run(request).await,
    }
}

/// Layer the health checks onto a router
///
/// Add routes (and any fallback) first; the middleware wraps what exists when
/// this is called.
pub fn with_health_checks<S>(router: Router<S>, health_checks: HealthChecks) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(
        health_checks,
        health_check_middleware,
    ))
}
