//! Holds one [`CircuitBreaker`] per service, created lazily on first reference
//! and never destroyed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::circuit::CircuitBreaker;
use crate::policy::PolicyTable;

pub struct CircuitRegistry {
    policies: PolicyTable,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(policies: PolicyTable) -> Self {
        Self { policies, breakers: Mutex::new(HashMap::new()) }
    }

    pub fn get_or_create(&self, service: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().expect("circuit registry poisoned");
        breakers
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.policies.get(service)))
            .clone()
    }

    /// Snapshot of every service touched so far, for `/metrics` gauge export and
    /// `/health/dashboard`-adjacent introspection. Tolerates concurrent mutation:
    /// it locks only long enough to clone the map's keys/values.
    pub fn snapshot(&self) -> Vec<(String, crate::circuit::CircuitState)> {
        let breakers = self.breakers.lock().expect("circuit registry poisoned");
        breakers.iter().map(|(name, breaker)| (name.clone(), breaker.state())).collect()
    }
}
