//! Per-service bounded concurrency.
//!
//! One [`tokio::sync::Semaphore`] per service. Non-SSE requests acquire a permit
//! before entering the breaker; SSE requests bypass this module entirely. The
//! returned [`AdmissionGuard`] releases on drop, so every exit path — early `?`
//! return, panic unwind, or client-disconnect cancellation — releases the slot
//! without a manual "release" call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

use crate::policy::PolicyTable;

#[derive(Debug, Clone, thiserror::Error)]
#[error("service '{service}' rejected: bulkhead full ({in_flight}/{max} in flight)")]
pub struct AdmissionRejected {
    pub service: String,
    pub in_flight: usize,
    pub max: usize,
}

struct ServiceGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// RAII permit; dropping it releases the service's admission slot.
pub struct AdmissionGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Holds one bounded gate per known service, created lazily from the policy table.
pub struct AdmissionLayer {
    policies: PolicyTable,
    gates: std::sync::Mutex<HashMap<String, ServiceGate>>,
}

impl AdmissionLayer {
    pub fn new(policies: PolicyTable) -> Self {
        Self { policies, gates: std::sync::Mutex::new(HashMap::new()) }
    }

    fn gate_for(&self, service: &str) -> (Arc<Semaphore>, usize) {
        let mut gates = self.gates.lock().expect("admission gate map poisoned");
        if let Some(gate) = gates.get(service) {
            return (gate.semaphore.clone(), gate.capacity);
        }
        let capacity = self.policies.get(service).admission_capacity;
        let semaphore = Arc::new(Semaphore::new(capacity));
        gates.insert(service.to_string(), ServiceGate { semaphore: semaphore.clone(), capacity });
        (semaphore, capacity)
    }

    /// Try to acquire a slot for `service`. Non-blocking: a full gate rejects
    /// immediately rather than queuing.
    pub fn try_acquire(&self, service: &str) -> Result<AdmissionGuard, AdmissionRejected> {
        let (semaphore, capacity) = self.gate_for(service);
        let in_flight = capacity.saturating_sub(semaphore.available_permits());
        match Arc::clone(&semaphore).try_acquire_owned() {
            Ok(permit) => Ok(AdmissionGuard { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(AdmissionRejected { service: service.to_string(), in_flight, max: capacity })
            }
        }
    }

    /// In-flight count for a service, exposed for tests and `/health/dashboard`-style
    /// introspection; 0 for a service that has never been touched.
    pub fn in_flight(&self, service: &str) -> usize {
        let gates = self.gates.lock().expect("admission gate map poisoned");
        gates
            .get(service)
            .map(|g| g.capacity.saturating_sub(g.semaphore.available_permits()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ServicePolicy;

    #[tokio::test]
    async fn rejects_once_capacity_is_exhausted() {
        let mut table = PolicyTable::default();
        table.insert(
            "img",
            ServicePolicy { admission_capacity: 2, ..ServicePolicy::default_policy() },
        );
        let layer = AdmissionLayer::new(table);

        let g1 = layer.try_acquire("img").expect("first permit");
        let g2 = layer.try_acquire("img").expect("second permit");
        assert_eq!(layer.in_flight("img"), 2);

        let rejected = layer.try_acquire("img");
        assert!(rejected.is_err());

        drop(g1);
        assert_eq!(layer.in_flight("img"), 1);
        let g3 = layer.try_acquire("img").expect("slot freed after drop");
        drop(g2);
        drop(g3);
    }

    #[tokio::test]
    async fn unknown_service_falls_back_to_default_capacity() {
        let layer = AdmissionLayer::new(PolicyTable::default());
        let mut guards = Vec::new();
        for _ in 0..20 {
            guards.push(layer.try_acquire("mystery").expect("within default capacity of 20"));
        }
        assert!(layer.try_acquire("mystery").is_err());
        drop(guards);
    }
}
