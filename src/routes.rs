//! The axum router: every externally-facing route, wired against a shared [`Gateway`].
//! `edgegate-server` mounts [`router`] behind CORS and graceful shutdown; tests
//! in this crate drive it directly with `tower::ServiceExt::oneshot`-style calls
//! via `axum::Router` without needing a bound socket.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use crate::admission::AdmissionRejected;
use crate::circuit::{Admission, RecordOutcome};
use crate::client::{is_sse_request, UpstreamRequest};
use crate::error::ProxyError;
use crate::gateway::Gateway;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/services", get(list_services))
        .route("/health/", get(health_basic))
        .route("/health/detail", get(health_detail))
        .route("/health/status", get(health_status))
        .route("/health/tests", get(health_tests))
        .route("/health/run-tests", post(health_run_tests))
        .route("/health/dashboard", get(health_dashboard))
        .route("/metrics", get(metrics_export))
        .route("/:service/*path", any(proxy))
        .with_state(gateway)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "API Gateway - Route requests to microservices" }))
}

async fn list_services(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({ "services": gateway.registry.service_names() }))
}

async fn health_basic() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_detail(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    let db_result = gateway.health.store().ping().await;
    let db_status = if db_result.is_ok() { "OK" } else { "ERROR" };

    Json(json!({
        "status": if db_result.is_ok() { "OK" } else { "ERROR" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "api": { "status": "OK" },
            "database": { "status": db_status, "error": db_result.err() },
            "health_monitoring": {
                "status": if gateway.health.is_running() { "OK" } else { "DOWN" },
                "running": gateway.health.is_running(),
            }
        }
    }))
}

async fn health_status(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({
        "running": gateway.health.is_running(),
        "services_monitored": gateway.health.services_monitored(),
    }))
}

#[derive(Debug, Deserialize)]
struct TestsQuery {
    service: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

async fn health_tests(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<TestsQuery>,
) -> Result<Json<serde_json::Value>, Response> {
    let (results, total) = gateway
        .health
        .test_results(query.service.as_deref(), query.limit, query.offset)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": e }))).into_response())?;
    Ok(Json(json!({ "results": results, "total": total })))
}

async fn health_run_tests(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    let monitor = gateway.health.clone();
    tokio::spawn(async move { monitor.run_all_tests().await });
    Json(json!({ "message": "Tests started" }))
}

async fn health_dashboard(State(gateway): State<Arc<Gateway>>) -> Result<Json<serde_json::Value>, Response> {
    let services = gateway
        .health
        .dashboard()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": e }))).into_response())?;
    let last_updated = services.iter().map(|s| s.updated_at).max();
    Ok(Json(json!({ "services": services, "last_updated": last_updated })))
}

/// `GET /metrics`: delegates to the wired [`crate::metrics::MetricsSink`]'s
/// `export()`, so `edgegate-prometheus` drives the body without this crate
/// depending on it.
async fn metrics_export(State(gateway): State<Arc<Gateway>>) -> String {
    gateway.metrics.export()
}

/// Proxy handler: registry -> (SSE branch | admission+breaker branch) ->
/// upstream client -> relay verbatim.
async fn proxy(
    State(gateway): State<Arc<Gateway>>,
    Path((service, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let base_url = match gateway.registry.lookup(&service) {
        Ok(url) => url,
        Err(e) => return e.into_response(),
    };

    let mut target_url = format!("{}/{}", base_url.trim_end_matches('/'), path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target_url.push('?');
        target_url.push_str(&query);
    }
    gateway.metrics.incr_requests(&service, method.as_str());

    if is_sse_request(&path, &headers) {
        return proxy_sse(&gateway, &service, method, target_url, headers, body.to_vec(), &path).await;
    }

    proxy_regular(&gateway, &service, method, target_url, headers, body.to_vec(), &path).await
}

async fn proxy_sse(
    gateway: &Arc<Gateway>,
    service: &str,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Vec<u8>,
    path: &str,
) -> Response {
    // SSE bypasses admission entirely; it still records the breaker outcome
    // observed at connect time.
    let breaker = gateway.circuits.get_or_create(service);
    let method_str = method.to_string();
    let url_for_log = url.clone();
    let request = UpstreamRequest {
        service,
        method,
        url,
        headers,
        body,
        request_timeout: std::time::Duration::from_secs(0),
    };

    match gateway.client.call_streamed(request).await {
        Ok(response) => {
            breaker.record(RecordOutcome::Success { status_code: response.status().as_u16() });
            response
        }
        Err(err) => {
            record_transport_failure(&breaker, &err, service, &method_str, &url_for_log, path);
            err.into_response()
        }
    }
}

async fn proxy_regular(
    gateway: &Arc<Gateway>,
    service: &str,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Vec<u8>,
    path: &str,
) -> Response {
    let guard = match gateway.admission.try_acquire(service) {
        Ok(guard) => guard,
        Err(AdmissionRejected { service, in_flight, max }) => {
            return ProxyError::BulkheadRejected { service, in_flight, max }.into_response();
        }
    };

    let breaker = gateway.circuits.get_or_create(service);
    let method_str = method.to_string();
    let url_for_log = url.clone();
    let response = match breaker.enter() {
        Admission::Proceed => {
            let request_timeout = breaker.policy().request_timeout;
            let request = UpstreamRequest { service, method, url, headers, body, request_timeout };
            let outcome = gateway.client.call_buffered(request, gateway.metrics.as_ref()).await;
            match outcome {
                Ok(response) => {
                    breaker.record(RecordOutcome::Success { status_code: response.status().as_u16() });
                    response
                }
                Err(err) => {
                    record_transport_failure(&breaker, &err, service, &method_str, &url_for_log, path);
                    err.into_response()
                }
            }
        }
        Admission::Reject { retry_after } => {
            // Rejections are fail-fast and never count as breaker failures.
            ProxyError::CircuitOpen { service: service.to_string(), retry_after_s: retry_after.as_secs() }
                .into_response()
        }
    };

    drop(guard);
    gateway.metrics.set_circuit_state(service, breaker.state() == crate::circuit::CircuitState::Open);
    response
}

/// §7: every upstream failure logs `{service, method, url, error, error_type, path}`.
fn record_transport_failure(
    breaker: &crate::circuit::CircuitBreaker,
    err: &ProxyError,
    service: &str,
    method: &str,
    url: &str,
    path: &str,
) {
    if err.counts_as_breaker_failure() {
        breaker.record(RecordOutcome::Failure);
    }
    tracing::error!(
        service,
        method,
        url,
        path,
        error = %err,
        error_type = err.error_type(),
        "upstream request failed"
    );
}

