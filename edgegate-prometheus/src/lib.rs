//! Prometheus-backed [`MetricsSink`] for edgegate, plus the `/metrics` exposition
//! body. Bring-your-own `prometheus::Registry`, registered once at construction,
//! backing the three named series the core's `MetricsSink` trait requires.

use edgegate_core::metrics::MetricsSink;
use prometheus::{Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    requests_total: IntCounterVec,
    request_latency_seconds: HistogramVec,
    circuit_state: GaugeVec,
}

impl PrometheusSink {
    /// Create a sink and register `gateway_requests_total`,
    /// `gateway_request_latency_seconds` and `gateway_circuit_state` into the
    /// provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric name collides with one already registered.
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("gateway_requests_total", "Total count of requests by service and method"),
            &["service", "method"],
        )?;
        let request_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "gateway_request_latency_seconds",
                "Request latency in seconds",
            ),
            &["service"],
        )?;
        let circuit_state = GaugeVec::new(
            prometheus::Opts::new("gateway_circuit_state", "Circuit state (1=open, 0=closed)"),
            &["service"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency_seconds.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self { registry, requests_total, request_latency_seconds, circuit_state })
    }

    /// Expose the registry for HTTP scraping (`/metrics`).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the current snapshot as Prometheus's text exposition format, the
    /// body `GET /metrics` returns.
    pub fn export(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer).expect("prometheus encoding never fails");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid utf8")
    }

    fn circuit_gauge(&self, service: &str) -> Gauge {
        self.circuit_state.with_label_values(&[service])
    }
}

impl MetricsSink for PrometheusSink {
    fn incr_requests(&self, service: &str, method: &str) {
        self.requests_total.with_label_values(&[service, method]).inc();
    }

    fn observe_latency(&self, service: &str, seconds: f64) {
        self.request_latency_seconds.with_label_values(&[service]).observe(seconds);
    }

    fn set_circuit_state(&self, service: &str, open: bool) {
        self.circuit_gauge(service).set(if open { 1.0 } else { 0.0 });
    }

    fn export(&self) -> String {
        PrometheusSink::export(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_exports_all_three_series() {
        let registry = Registry::new();
        let sink = PrometheusSink::new(registry).unwrap();

        sink.incr_requests("core", "GET");
        sink.observe_latency("core", 0.125);
        sink.set_circuit_state("core", true);

        let exported = sink.export();
        assert!(exported.contains("gateway_requests_total"));
        assert!(exported.contains("gateway_request_latency_seconds"));
        assert!(exported.contains("gateway_circuit_state"));
    }
}
