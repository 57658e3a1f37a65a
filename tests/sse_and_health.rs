//! S5 (SSE passthrough bypasses admission) and the `/health/*` surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use edgegate_core::Gateway;
use futures_util::stream;
use serde_json::Value;

async fn spawn_sse_upstream() -> String {
    let app = Router::new().route(
        "/sse/events",
        get(|| async {
            let chunks = stream::iter(vec![
                Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"data: one\n\n")),
                Ok(axum::body::Bytes::from_static(b"data: two\n\n")),
            ]);
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(chunks))
                .unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_gateway(seed: HashMap<String, String>) -> (String, Arc<Gateway>) {
    let gateway = Arc::new(Gateway::new(seed));
    let app = edgegate_core::routes::router(gateway.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), gateway)
}

#[tokio::test]
async fn sse_requests_bypass_admission_and_stream_until_upstream_closes() {
    let upstream = spawn_sse_upstream().await;
    let mut seed = HashMap::new();
    seed.insert("core".to_string(), upstream);
    let (gateway_url, gateway) = spawn_gateway(seed).await;

    // Saturate core's admission (default capacity 20) before issuing the SSE call.
    let mut guards = Vec::new();
    for _ in 0..20 {
        guards.push(gateway.admission.try_acquire("core").unwrap());
    }

    let response = reqwest::get(format!("{gateway_url}/core/sse/events")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
    let body = response.text().await.unwrap();
    assert!(body.contains("one"));
    assert!(body.contains("two"));

    // Admission was never touched by the SSE request.
    assert_eq!(gateway.admission.in_flight("core"), 20);
    drop(guards);
}

#[tokio::test]
async fn health_basic_and_status_endpoints_respond() {
    let (gateway_url, _gateway) = spawn_gateway(HashMap::new()).await;

    let response = reqwest::get(format!("{gateway_url}/health/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "OK");

    let response = reqwest::get(format!("{gateway_url}/health/status")).await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["running"], false);

    let response = reqwest::get(format!("{gateway_url}/health/tests")).await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 0);

    let response = reqwest::get(format!("{gateway_url}/health/dashboard")).await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["services"].as_array().unwrap().len(), 0);
}
