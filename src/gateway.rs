//! The `Gateway` value: owns every dataplane subsystem by composition and is
//! passed explicitly to HTTP handlers.
//!
//! Initialisation order: metrics sink -> registry (seeded from env) -> breaker
//! table (lazy) -> admission table (static policy) -> upstream client ->
//! health monitor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::admission::AdmissionLayer;
use crate::circuit_registry::CircuitRegistry;
use crate::client::UpstreamClient;
use crate::health::{HealthMonitor, HealthStore, InMemoryHealthStore};
use crate::metrics::{MetricsSink, NoopSink};
use crate::policy::PolicyTable;
use crate::registry::ServiceRegistry;

pub struct Gateway {
    pub registry: Arc<ServiceRegistry>,
    pub circuits: Arc<CircuitRegistry>,
    pub admission: Arc<AdmissionLayer>,
    pub client: Arc<UpstreamClient>,
    pub metrics: Arc<dyn MetricsSink>,
    pub health: Arc<HealthMonitor>,
}

impl Gateway {
    /// Build a gateway from an env-var seed (`name -> base_url`) and optional
    /// metrics/health-store implementations; defaults to no-op/in-memory so the
    /// core is runnable standalone (tests, `edgegate-server` without Postgres
    /// configured).
    pub fn new(seed: HashMap<String, String>) -> Self {
        Self::with_backends(seed, Arc::new(NoopSink), Arc::new(InMemoryHealthStore::default()))
    }

    pub fn with_backends(
        seed: HashMap<String, String>,
        metrics: Arc<dyn MetricsSink>,
        health_store: Arc<dyn HealthStore>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::seeded(seed));
        let policies = PolicyTable::default();
        let circuits = Arc::new(CircuitRegistry::new(policies.clone()));
        let admission = Arc::new(AdmissionLayer::new(policies));
        let client = Arc::new(UpstreamClient::new());
        let health = Arc::new(HealthMonitor::new(registry.clone(), health_store));

        Self { registry, circuits, admission, client, metrics, health }
    }
}
