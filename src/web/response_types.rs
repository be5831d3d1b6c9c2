//! # Health Response Types
//!
//! The HTTP outcome of a matched health endpoint and its conversion into an Axum
//! response.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::endpoint::HealthFailure;

/// Body sent for a healthy endpoint
pub const OK_BODY: &str = "ok";

/// Body of a health response
#[derive(Debug, Clone, PartialEq)]
pub enum HealthBody {
    Text(String),
    Json(Value),
}

/// Status and body for a matched health endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct HealthResponse {
    status: StatusCode,
    body: HealthBody,
}

impl HealthResponse {
    /// 200 with the fixed `ok` body
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            body: HealthBody::Text(OK_BODY.to_string()),
        }
    }

    /// Failure response: plain message, or every failure property as JSON when verbose
    pub fn failure(failure: &HealthFailure, verbose: bool) -> Self {
        let status = StatusCode::from_u16(failure.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = if verbose {
            HealthBody::Json(failure.to_verbose_json())
        } else {
            HealthBody::Text(failure.message().to_string())
        };
        Self { status, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &HealthBody {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self.body {
            HealthBody::Text(text) => (
                self.status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text,
            )
                .into_response(),
            HealthBody::Json(value) => (self.status, Json(value)).into_response(),
        }
    }
}
