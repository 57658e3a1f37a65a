//! The upstream client: exactly one upstream HTTP call per invocation, in one of
//! two modes — buffered or streamed — built over `reqwest::Client`.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;
use reqwest::Client;

use crate::error::{Outcome, ProxyError};
use crate::metrics::MetricsSink;

/// One upstream call, constructed by the proxy handler (or the health monitor,
/// which calls [`UpstreamClient::call`] directly, bypassing breaker/admission).
pub struct UpstreamRequest<'a> {
    pub service: &'a str,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub request_timeout: Duration,
}

/// `sse/` path prefix or an inbound `Accept: text/event-stream`. The classifier
/// inspects only inbound hints: inspecting the upstream response instead would
/// require buffering the first chunk, defeating the streaming branch.
pub fn is_sse_request(path: &str, headers: &HeaderMap) -> bool {
    if path.starts_with("sse/") {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        // No global timeout: SSE calls need none, and non-SSE calls pass a
        // per-request timeout via `RequestBuilder::timeout` below.
        Self { http: Client::builder().build().expect("reqwest client builds") }
    }

    /// Strip the inbound `Host` header and stamp `X-From-Gateway: true`.
    pub fn prepare_headers(mut headers: HeaderMap) -> HeaderMap {
        headers.remove(header::HOST);
        headers.insert(
            HeaderName::from_static("x-from-gateway"),
            HeaderValue::from_static("true"),
        );
        headers
    }

    /// Default `Content-Type: application/json` on bodied methods, but only when
    /// absent — preserving an inbound multipart boundary matters for uploads.
    fn apply_content_type_default(method: &Method, body: &[u8], headers: &mut HeaderMap) {
        let bodied = matches!(*method, Method::POST | Method::PUT | Method::PATCH);
        if bodied && !body.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
    }

    /// Non-SSE mode: buffer the full response under `request.request_timeout`,
    /// decode as JSON when possible, else relay raw bytes with the upstream's
    /// `Content-Type` and status. Records a latency observation either way.
    pub async fn call_buffered(
        &self,
        request: UpstreamRequest<'_>,
        metrics: &dyn MetricsSink,
    ) -> Result<Response, ProxyError> {
        let mut headers = Self::prepare_headers(request.headers);
        Self::apply_content_type_default(&request.method, &request.body, &mut headers);

        let started = Instant::now();
        let outcome = self
            .send(&request.method, &request.url, headers, request.body, Some(request.request_timeout))
            .await;
        metrics.observe_latency(request.service, started.elapsed().as_secs_f64());

        match outcome {
            Outcome::Response { status, body, content_type } => {
                Ok(Self::buffered_response(status, body, content_type))
            }
            Outcome::Timeout => Err(ProxyError::UpstreamTimeout { service: request.service.to_string() }),
            Outcome::ConnectError(cause) => {
                Err(ProxyError::UpstreamUnavailable { service: request.service.to_string(), cause })
            }
            Outcome::Other(cause) => {
                Err(ProxyError::UpstreamError { service: request.service.to_string(), cause })
            }
        }
    }

    /// SSE mode: open the upstream request with no overall deadline and relay the
    /// body as a chunked stream as soon as headers arrive. Never buffers.
    pub async fn call_streamed(
        &self,
        request: UpstreamRequest<'_>,
    ) -> Result<Response, ProxyError> {
        let headers = Self::prepare_headers(request.headers);
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let upstream = builder.send().await.map_err(|e| {
            let outcome: Outcome = e.into();
            match outcome {
                Outcome::Timeout => ProxyError::UpstreamTimeout { service: request.service.to_string() },
                Outcome::ConnectError(cause) => {
                    ProxyError::UpstreamUnavailable { service: request.service.to_string(), cause }
                }
                Outcome::Other(cause) => {
                    ProxyError::UpstreamError { service: request.service.to_string(), cause }
                }
                Outcome::Response { .. } => unreachable!("send() error never yields Outcome::Response"),
            }
        })?;

        let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let byte_stream = upstream.bytes_stream().map_err(std::io::Error::other);
        let body = Body::from_stream(byte_stream);

        let mut response = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .expect("well-formed SSE response");
        *response.status_mut() = status;
        Ok(response)
    }

    /// Used by the health monitor: exactly one request, buffered, under a fixed
    /// deadline, bypassing breaker/admission entirely.
    pub async fn probe(
        &self,
        method: Method,
        url: &str,
        deadline: Duration,
    ) -> Outcome {
        self.send(&method, url, HeaderMap::new(), Vec::new(), Some(deadline)).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Outcome {
        let mut builder = self.http.request(method.clone(), url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return e.into(),
        };

        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned();
        match response.bytes().await {
            Ok(bytes) => Outcome::Response { status, body: bytes.to_vec(), content_type },
            Err(e) => e.into(),
        }
    }

    fn buffered_response(status: StatusCode, body: Vec<u8>, content_type: Option<HeaderValue>) -> Response {
        // Try JSON first so the gateway emits a JSON response carrying the upstream
        // status verbatim; fall back to raw bytes with the upstream's Content-Type.
        if serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
            let mut response = Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("well-formed JSON relay response");
            *response.status_mut() = status;
            return response;
        }

        let mut builder = Response::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        } else {
            builder = builder.header(header::CONTENT_TYPE, "text/plain");
        }
        builder.body(Body::from(body)).expect("well-formed raw relay response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_classification_follows_path_prefix() {
        assert!(is_sse_request("sse/events", &HeaderMap::new()));
        assert!(!is_sse_request("events", &HeaderMap::new()));
    }

    #[test]
    fn sse_classification_follows_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert!(is_sse_request("events", &headers));
    }

    #[test]
    fn content_type_default_preserves_inbound_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=x"));
        UpstreamClient::apply_content_type_default(&Method::POST, b"body", &mut headers);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "multipart/form-data; boundary=x"
        );
    }

    #[test]
    fn content_type_defaults_to_json_when_absent() {
        let mut headers = HeaderMap::new();
        UpstreamClient::apply_content_type_default(&Method::POST, b"body", &mut headers);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn get_requests_never_get_a_content_type_stamped() {
        let mut headers = HeaderMap::new();
        UpstreamClient::apply_content_type_default(&Method::GET, b"", &mut headers);
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn host_header_is_stripped_and_gateway_header_stamped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("client-supplied-host"));
        let headers = UpstreamClient::prepare_headers(headers);
        assert!(headers.get(header::HOST).is_none());
        assert_eq!(headers.get("x-from-gateway").unwrap(), "true");
    }
}
