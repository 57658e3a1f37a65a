//! Abstract metrics sink: a counter, a histogram and a gauge, each keyed by
//! label tuples. `edgegate-core` depends only on this trait; `edgegate-prometheus`
//! is the production implementation.
//!
//! Every method is fire-and-forget (no `Result`) so a metrics backend never
//! blocks or fails the request path it's observing.

/// The three named series the core requires. Implementers may add more without
/// edgegate-core depending on the additions.
pub trait MetricsSink: Send + Sync {
    /// `gateway_requests_total{service,method}` += 1.
    fn incr_requests(&self, service: &str, method: &str);
    /// `gateway_request_latency_seconds{service}`.observe(seconds).
    fn observe_latency(&self, service: &str, seconds: f64);
    /// `gateway_circuit_state{service}`.set(1.0 if open else 0.0).
    fn set_circuit_state(&self, service: &str, open: bool);

    /// Render the `GET /metrics` exposition body. Sinks with nothing to export
    /// (the [`NoopSink`], tests) keep the default placeholder; `edgegate-prometheus`
    /// overrides this with the registry's text-format encoding.
    fn export(&self) -> String {
        "# metrics sink not configured\n".to_string()
    }
}

/// Discards everything. Used when no metrics backend is wired (tests, or a
/// deployment that doesn't care).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn incr_requests(&self, _service: &str, _method: &str) {}
    fn observe_latency(&self, _service: &str, _seconds: f64) {}
    fn set_circuit_state(&self, _service: &str, _open: bool) {}
}

/// One recorded emission, for test assertions against [`InMemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Request { service: String, method: String },
    Latency { service: String, seconds: f64 },
    CircuitState { service: String, open: bool },
}

/// Records every emission in order. Test-only; not exported from the prelude
/// used by production wiring.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: std::sync::Mutex<Vec<MetricEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().expect("metrics sink poisoned").clone()
    }
}

impl MetricsSink for InMemorySink {
    fn incr_requests(&self, service: &str, method: &str) {
        self.events
            .lock()
            .expect("metrics sink poisoned")
            .push(MetricEvent::Request { service: service.to_string(), method: method.to_string() });
    }

    fn observe_latency(&self, service: &str, seconds: f64) {
        self.events
            .lock()
            .expect("metrics sink poisoned")
            .push(MetricEvent::Latency { service: service.to_string(), seconds });
    }

    fn set_circuit_state(&self, service: &str, open: bool) {
        self.events
            .lock()
            .expect("metrics sink poisoned")
            .push(MetricEvent::CircuitState { service: service.to_string(), open });
    }
}
