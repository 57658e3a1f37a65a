//! Convenient re-exports for building on top of edgegate-core.
pub use crate::{
    admission::{AdmissionGuard, AdmissionLayer, AdmissionRejected},
    circuit::{Admission, CircuitBreaker, CircuitState, RecordOutcome},
    circuit_registry::CircuitRegistry,
    client::{is_sse_request, UpstreamClient, UpstreamRequest},
    clock::{Clock, MonotonicClock},
    error::{Outcome, ProxyError},
    gateway::Gateway,
    health::{default_probes, HealthMonitor, HealthStore, InMemoryHealthStore, ProbeDefinition},
    metrics::{InMemorySink, MetricEvent, MetricsSink, NoopSink},
    models::{ServiceEntry, ServiceHealth, ServiceStatus, TestResult, TestStatus},
    policy::{PolicyTable, ServicePolicy},
    registry::{DiscoveredInstance, DiscoverySource, ServiceRegistry},
    routes::router,
};
