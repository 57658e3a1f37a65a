//! The gateway's error taxonomy.
//!
//! `ProxyError` discriminates every way a proxied request can fail so the HTTP edge
//! (`IntoResponse` below) and the circuit breaker's `record` call can each make their
//! own decision from one value, instead of re-inspecting a transport exception.

use std::fmt;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Outcome of one upstream attempt, as observed by the upstream client.
///
/// This is the tagged variant design note §9 calls for: transport failures are
/// classified once, here, rather than downstream code matching on exception types.
#[derive(Debug)]
pub enum Outcome {
    /// The upstream responded; status may still be 4xx/5xx.
    Response { status: StatusCode, body: Vec<u8>, content_type: Option<HeaderValue> },
    /// The request exceeded its deadline.
    Timeout,
    /// Connection refused, reset, DNS failure, or similar transport-level failure.
    ConnectError(String),
    /// Any other unexpected failure constructing or sending the request.
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Circuit open for service '{service}'. Retry in ~{retry_after_s}s")]
    CircuitOpen { service: String, retry_after_s: u64 },

    #[error("Service '{service}' rejected: bulkhead full ({in_flight}/{max} in flight)")]
    BulkheadRejected { service: String, in_flight: usize, max: usize },

    #[error("Service '{service}' request timed out")]
    UpstreamTimeout { service: String },

    #[error("Service '{service}' unavailable: {cause}")]
    UpstreamUnavailable { service: String, cause: String },

    #[error("Error calling service '{service}': {cause}")]
    UpstreamError { service: String, cause: String },
}

impl ProxyError {
    /// Does this outcome count as a breaker failure?
    ///
    /// Registry misses and breaker rejections never count (they're generated locally).
    /// Transport errors always count. A successful upstream response (2xx/3xx/4xx/5xx)
    /// is never represented as a `ProxyError` at all — those are classified directly
    /// from the status code by `CircuitBreaker::record`, including the
    /// `count_4xx_as_failure` policy knob.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamTimeout { .. }
                | ProxyError::UpstreamUnavailable { .. }
                | ProxyError::UpstreamError { .. }
        )
    }

    /// Short tag for the `error_type` field in structured failure logs (§7).
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::ServiceNotFound(_) => "service_not_found",
            ProxyError::CircuitOpen { .. } => "circuit_open",
            ProxyError::BulkheadRejected { .. } => "bulkhead_rejected",
            ProxyError::UpstreamTimeout { .. } => "upstream_timeout",
            ProxyError::UpstreamUnavailable { .. } => "upstream_unavailable",
            ProxyError::UpstreamError { .. } => "upstream_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ProxyError::ServiceNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ProxyError::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ProxyError::BulkheadRejected { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ProxyError::UpstreamTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            ProxyError::UpstreamUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ProxyError::UpstreamError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let payload = serde_json::json!({ "detail": detail });
        let mut response =
            (status, axum::Json(payload)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl From<reqwest::Error> for Outcome {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Outcome::Timeout
        } else if err.is_connect() {
            Outcome::ConnectError(err.to_string())
        } else {
            Outcome::Other(err.to_string())
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Response { status, .. } => write!(f, "response({status})"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::ConnectError(e) => write!(f, "connect-error({e})"),
            Outcome::Other(e) => write!(f, "other({e})"),
        }
    }
}
