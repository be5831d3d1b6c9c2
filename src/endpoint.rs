//! # Health Endpoints
//!
//! A named health aspect (`healthy`, `alive`, `ready`) with a valid/invalid state and
//! an optional HTTP path it answers on.
//!
//! The error payload is modelled as a tagged variant rather than a nullable field:
//! [`EndpointState::Valid`] or [`EndpointState::Invalid`] carrying a [`HealthError`].
//! The only place where the reserved `null`/`true` values can appear is the dynamic
//! [`serde_json::Value`] entry point, which rejects them.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{HealthCheckError, Result};

/// Status used when a failure carries no usable HTTP status
pub const DEFAULT_FAILURE_STATUS: u16 = 500;

/// A health failure with its message, optional status and extra properties
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthFailure {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(flatten)]
    properties: Map<String, Value>,
}

impl HealthFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            code: None,
            properties: Map::new(),
        }
    }

    /// Attach an explicit HTTP status code
    pub fn with_status_code(mut self, status_code: i64) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Attach a numeric error code, used as a status fallback
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach an extra property exposed in verbose responses
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<i64> {
        self.status_code
    }

    pub fn code(&self) -> Option<i64> {
        self.code
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// HTTP status for this failure: `status_code`, then `code`, when within [100, 599]
    pub fn http_status(&self) -> u16 {
        [self.status_code, self.code]
            .into_iter()
            .flatten()
            .find(|candidate| (100..=599).contains(candidate))
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or(DEFAULT_FAILURE_STATUS)
    }

    /// Verbose body: `message` and resolved `statusCode` merged with every property
    pub fn to_verbose_json(&self) -> Value {
        // Resolved fields win over properties of the same name
        let mut body = self.properties.clone();
        body.insert("message".to_string(), Value::from(self.message.clone()));
        body.insert("statusCode".to_string(), Value::from(self.http_status()));
        if let Some(code) = self.code {
            body.insert("code".to_string(), Value::from(code));
        }
        Value::Object(body)
    }

    fn from_object(mut object: Map<String, Value>) -> Self {
        let message = match object.remove("message") {
            Some(Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => Value::Object(object.clone()).to_string(),
        };
        let status_code = take_integer(&mut object, "statusCode");
        let code = take_integer(&mut object, "code");

        Self {
            message,
            status_code,
            code,
            properties: object,
        }
    }
}

fn take_integer(object: &mut Map<String, Value>, key: &str) -> Option<i64> {
    let value = object.get(key).and_then(Value::as_i64)?;
    object.remove(key);
    Some(value)
}

impl fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HealthFailure {}

impl From<&str> for HealthFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HealthFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The payload of an invalid endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum HealthError {
    /// Invalid without detail (the `false`/`undefined` case)
    Unspecified,
    /// Invalid with a concrete failure
    Failure(HealthFailure),
}

impl HealthError {
    /// Failure to report for this error, substituting a generic one when unspecified
    pub fn to_failure(&self, endpoint_name: &str) -> HealthFailure {
        match self {
            HealthError::Unspecified => HealthFailure::new(format!("{endpoint_name} check failed")),
            HealthError::Failure(failure) => failure.clone(),
        }
    }
}

impl From<HealthFailure> for HealthError {
    fn from(failure: HealthFailure) -> Self {
        HealthError::Failure(failure)
    }
}

/// Dynamic conversion; the reserved `null` and `true` values are handed back as rejected
impl TryFrom<Value> for HealthError {
    type Error = Value;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null | Value::Bool(true) => Err(value),
            Value::Bool(false) => Ok(HealthError::Unspecified),
            Value::String(message) => Ok(HealthError::Failure(HealthFailure::new(message))),
            Value::Object(object) => Ok(HealthError::Failure(HealthFailure::from_object(object))),
            other => Ok(HealthError::Failure(HealthFailure::new(other.to_string()))),
        }
    }
}

impl fmt::Display for HealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthError::Unspecified => f.write_str("false"),
            HealthError::Failure(failure) => write!(f, "{failure}"),
        }
    }
}

/// Current state of an endpoint
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EndpointState {
    #[default]
    Valid,
    Invalid(HealthError),
}

/// Outcome of evaluating an endpoint against a request path
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointMatch {
    NotMatched,
    Healthy,
    Failed(HealthFailure),
}

/// A named health aspect
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    path: Option<String>,
    state: RwLock<EndpointState>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            name: name.into(),
            path,
            state: RwLock::new(EndpointState::Valid),
        }
    }

    /// Create an endpoint whose initial state comes from a dynamic value
    ///
    /// `None` and `null` both mean valid; `true` is rejected.
    pub fn with_initial_value(
        name: impl Into<String>,
        path: Option<String>,
        initial_value: Option<Value>,
    ) -> Result<Self> {
        let endpoint = Self::new(name, path);
        match initial_value {
            None | Some(Value::Null) => {}
            Some(value) => endpoint.set_error_value(value)?,
        }
        Ok(endpoint)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn state(&self) -> EndpointState {
        self.state.read().clone()
    }

    /// The stored error, `None` when valid
    pub fn error(&self) -> Option<HealthError> {
        match &*self.state.read() {
            EndpointState::Valid => None,
            EndpointState::Invalid(error) => Some(error.clone()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(*self.state.read(), EndpointState::Valid)
    }

    pub fn set_valid(&self) {
        *self.state.write() = EndpointState::Valid;
    }

    pub fn set_error(&self, error: impl Into<HealthError>) {
        *self.state.write() = EndpointState::Invalid(error.into());
    }

    /// Set the error from a dynamic value, rejecting `null` and `true`
    pub fn set_error_value(&self, value: Value) -> Result<()> {
        let error = HealthError::try_from(value).map_err(|rejected| {
            HealthCheckError::invalid_error_value(&self.name, rejected.to_string())
        })?;
        self.set_error(error);
        Ok(())
    }

    /// Clear the error only if it is still exactly `error`
    pub fn clear_if(&self, error: &HealthError) -> bool {
        let mut state = self.state.write();
        match &*state {
            EndpointState::Invalid(current) if current == error => {
                *state = EndpointState::Valid;
                true
            }
            _ => false,
        }
    }

    /// Match a request path against this endpoint
    ///
    /// An endpoint without a path is never served on its own route.
    pub fn evaluate(&self, request_path: &str) -> EndpointMatch {
        match self.path.as_deref() {
            Some(path) if path == request_path => {}
            _ => return EndpointMatch::NotMatched,
        }

        match &*self.state.read() {
            EndpointState::Valid => EndpointMatch::Healthy,
            EndpointState::Invalid(error) => EndpointMatch::Failed(error.to_failure(&self.name)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.as_deref().map_or_else(|| "null".to_string(), |p| format!("'{p}'"));
        let error = match &*self.state.read() {
            EndpointState::Valid => "null".to_string(),
            EndpointState::Invalid(error) => error.to_string(),
        };
        write!(f, "Endpoint {{ name: '{}', path: {path}, error: {error} }}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_values() {
        let ep = Endpoint::new("name", None);
        assert_eq!(ep.name(), "name");
        assert_eq!(ep.path(), None);
        assert_eq!(ep.state(), EndpointState::Valid);
        assert!(ep.error().is_none());
    }

    #[test]
    fn test_initial_values() {
        let ep = Endpoint::with_initial_value("name", None, Some(json!(false))).unwrap();
        assert_eq!(ep.error(), Some(HealthError::Unspecified));

        let ep = Endpoint::with_initial_value("name", None, Some(Value::Null)).unwrap();
        assert!(ep.is_valid());

        let err = Endpoint::with_initial_value("name", None, Some(json!(true))).unwrap_err();
        assert_eq!(err.to_string(), "Not allowed to set name with true error");
    }

    #[test]
    fn test_set_error_value_rejects_reserved_values() {
        let ep = Endpoint::new("name", None);

        let err = ep.set_error_value(Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Not allowed to set name with null error");

        let err = ep.set_error_value(json!(true)).unwrap_err();
        assert_eq!(err.to_string(), "Not allowed to set name with true error");

        assert!(ep.is_valid());
    }

    #[test]
    fn test_set_error_value_keeps_object_fields() {
        let ep = Endpoint::new("name", None);
        ep.set_error_value(json!({
            "message": "Some error",
            "statusCode": 512,
            "visible": { "complex": true }
        }))
        .unwrap();

        let Some(HealthError::Failure(failure)) = ep.error() else {
            panic!("Expected a failure");
        };
        assert_eq!(failure.message(), "Some error");
        assert_eq!(failure.status_code(), Some(512));
        assert_eq!(failure.properties().get("visible"), Some(&json!({ "complex": true })));
        assert!(!failure.properties().contains_key("statusCode"));
    }

    #[test]
    fn test_set_valid_clears() {
        let ep = Endpoint::new("name", None);
        ep.set_error(HealthFailure::new("Some error"));
        assert!(!ep.is_valid());
        ep.set_valid();
        assert!(ep.is_valid());
    }

    #[test]
    fn test_clear_if_only_matching_error() {
        let ep = Endpoint::new("name", None);
        let stale: HealthError = HealthFailure::new("stale").into();
        ep.set_error(HealthFailure::new("manual"));

        assert!(!ep.clear_if(&stale));
        assert!(!ep.is_valid());

        ep.set_error(stale.clone());
        assert!(ep.clear_if(&stale));
        assert!(ep.is_valid());
    }

    #[test]
    fn test_evaluate_paths() {
        let no_path = Endpoint::new("name", None);
        assert_eq!(no_path.evaluate("/path"), EndpointMatch::NotMatched);

        let ep = Endpoint::new("name", Some("/path".to_string()));
        assert_eq!(ep.evaluate("/other"), EndpointMatch::NotMatched);
        assert_eq!(ep.evaluate("/path"), EndpointMatch::Healthy);

        ep.set_error(HealthError::Unspecified);
        assert_eq!(
            ep.evaluate("/path"),
            EndpointMatch::Failed(HealthFailure::new("name check failed"))
        );

        let failure = HealthFailure::new("Some error");
        ep.set_error(failure.clone());
        assert_eq!(ep.evaluate("/path"), EndpointMatch::Failed(failure));
    }

    #[test]
    fn test_http_status_resolution() {
        assert_eq!(HealthFailure::new("x").http_status(), 500);
        assert_eq!(HealthFailure::new("x").with_status_code(512).http_status(), 512);
        assert_eq!(HealthFailure::new("x").with_code(511).http_status(), 511);
        assert_eq!(
            HealthFailure::new("x").with_status_code(99).with_code(503).http_status(),
            503
        );
        assert_eq!(HealthFailure::new("x").with_status_code(600).http_status(), 500);
        assert_eq!(HealthFailure::new("x").with_status_code(100).http_status(), 100);
        assert_eq!(HealthFailure::new("x").with_status_code(599).http_status(), 599);
    }

    #[test]
    fn test_verbose_json() {
        let failure = HealthFailure::new("Some error")
            .with_status_code(512)
            .with_property("visible", json!({ "complex": true }));

        assert_eq!(
            failure.to_verbose_json(),
            json!({
                "message": "Some error",
                "statusCode": 512,
                "visible": { "complex": true }
            })
        );
    }

    #[test]
    fn test_verbose_json_keeps_resolved_fields() {
        let failure = HealthError::try_from(json!({
            "message": "Some error",
            "statusCode": "bogus",
            "detail": "kept"
        }))
        .unwrap()
        .to_failure("alive");

        assert_eq!(failure.http_status(), 500);
        assert_eq!(
            failure.to_verbose_json(),
            json!({
                "message": "Some error",
                "statusCode": 500,
                "detail": "kept"
            })
        );

        let failure = HealthFailure::new("shadowed")
            .with_code(503)
            .with_property("message", "other")
            .with_property("code", "ECONNRESET");
        let body = failure.to_verbose_json();
        assert_eq!(body["message"], "shadowed");
        assert_eq!(body["statusCode"], 503);
        assert_eq!(body["code"], 503);
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::new("healthy", Some("/_ah/health".to_string()));
        assert_eq!(
            ep.to_string(),
            "Endpoint { name: 'healthy', path: '/_ah/health', error: null }"
        );
        ep.set_error(HealthError::Unspecified);
        assert!(ep.to_string().ends_with("error: false }"));
    }
}
