//! The service registry: `name -> base_url`, refreshed from a [`DiscoverySource`]
//! and falling back to `{NAME_UPPER}_SERVICE_URL` environment variables.
//! Owned by the [`crate::Gateway`] rather than a global, backed by
//! `arc_swap::ArcSwap` so lookups never block a concurrent refresh.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProxyError;
use crate::models::ServiceEntry;

/// One discovered instance, as reported by the discovery source. `edgegate-core`
/// has zero network dependency on Consul (or anything else); `edgegate-consul`
/// is the only crate that speaks the catalog API and produces these.
#[derive(Debug, Clone)]
pub struct DiscoveredInstance {
    pub name: String,
    pub address: String,
    pub service_address: Option<String>,
    pub service_port: u16,
}

/// Abstract discovery backend. `edgegate-consul` implements this against Consul's
/// HTTP catalog API; tests use an in-memory stub.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// List all service instances known to the backend, excluding the discovery
    /// system's own service entry.
    async fn list_services(&self) -> Result<Vec<DiscoveredInstance>, String>;
}

struct RegistryState {
    entries: HashMap<String, ServiceEntry>,
    refreshed_at: DateTime<Utc>,
}

/// The registry. Construct via [`ServiceRegistry::seeded`] so the gateway is
/// serviceable before the first discovery round completes.
pub struct ServiceRegistry {
    state: ArcSwap<RegistryState>,
}

impl ServiceRegistry {
    /// Build a registry seeded from a fixed set of `name -> base_url` env defaults,
    /// so the gateway has working routes from the moment it starts accepting
    /// connections.
    pub fn seeded(seed: HashMap<String, String>) -> Self {
        let now = Utc::now();
        let entries = seed
            .into_iter()
            .map(|(name, base_url)| {
                let entry = ServiceEntry { name: name.clone(), base_url, discovered_at: now };
                (name, entry)
            })
            .collect();
        Self { state: ArcSwap::from_pointee(RegistryState { entries, refreshed_at: now }) }
    }

    pub fn empty() -> Self {
        Self::seeded(HashMap::new())
    }

    /// `lookup(name)`: cached URL if present, else `{NAME_UPPER}_SERVICE_URL`,
    /// else `NotFound`.
    pub fn lookup(&self, service: &str) -> Result<String, ProxyError> {
        let snapshot = self.state.load();
        if let Some(entry) = snapshot.entries.get(service) {
            return Ok(entry.base_url.clone());
        }
        let env_var = format!("{}_SERVICE_URL", service.to_uppercase());
        if let Ok(url) = std::env::var(&env_var) {
            return Ok(url);
        }
        Err(ProxyError::ServiceNotFound(service.to_string()))
    }

    /// Current snapshot of service names, for `/services`.
    pub fn service_names(&self) -> Vec<String> {
        self.state.load().entries.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ServiceEntry> {
        self.state.load().entries.values().cloned().collect()
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.state.load().refreshed_at
    }

    /// `refresh()`: query the discovery source, pick one instance per service
    /// (the first), prefer `service_address` over `address`, build `http://host:port`,
    /// and atomically replace the mapping. Failures leave the previous snapshot in
    /// place and are the caller's responsibility to log.
    pub async fn refresh(&self, source: &dyn DiscoverySource) -> Result<usize, String> {
        let instances = source.list_services().await?;

        let mut by_name: HashMap<String, DiscoveredInstance> = HashMap::new();
        for instance in instances {
            // "picks one instance per service (the first)"
            by_name.entry(instance.name.clone()).or_insert(instance);
        }

        let now = Utc::now();
        let entries: HashMap<String, ServiceEntry> = by_name
            .into_iter()
            .map(|(name, instance)| {
                let host = instance
                    .service_address
                    .filter(|a| !a.is_empty())
                    .unwrap_or(instance.address);
                let base_url = format!("http://{}:{}", host, instance.service_port);
                (name.clone(), ServiceEntry { name, base_url, discovered_at: now })
            })
            .collect();

        let count = entries.len();
        self.state.store(Arc::new(RegistryState { entries, refreshed_at: now }));
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource(Vec<DiscoveredInstance>);

    #[async_trait]
    impl DiscoverySource for StubSource {
        async fn list_services(&self) -> Result<Vec<DiscoveredInstance>, String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn refresh_replaces_the_mapping_atomically() {
        let registry = ServiceRegistry::empty();
        let source = StubSource(vec![DiscoveredInstance {
            name: "core".into(),
            address: "10.0.0.1".into(),
            service_address: None,
            service_port: 8000,
        }]);
        registry.refresh(&source).await.unwrap();
        assert_eq!(registry.lookup("core").unwrap(), "http://10.0.0.1:8000");
    }

    #[tokio::test]
    async fn prefers_service_address_over_address() {
        let registry = ServiceRegistry::empty();
        let source = StubSource(vec![DiscoveredInstance {
            name: "core".into(),
            address: "10.0.0.1".into(),
            service_address: Some("core.internal".into()),
            service_port: 8000,
        }]);
        registry.refresh(&source).await.unwrap();
        assert_eq!(registry.lookup("core").unwrap(), "http://core.internal:8000");
    }

    #[tokio::test]
    async fn lookup_falls_back_to_env_var_then_not_found() {
        let registry = ServiceRegistry::empty();
        std::env::set_var("PAYMENTS_SERVICE_URL", "http://p:9000");
        assert_eq!(registry.lookup("payments").unwrap(), "http://p:9000");
        std::env::remove_var("PAYMENTS_SERVICE_URL");
        assert!(registry.lookup("payments").is_err());
    }

    #[tokio::test]
    async fn failed_refresh_leaves_previous_snapshot_in_place() {
        struct FailingSource;
        #[async_trait]
        impl DiscoverySource for FailingSource {
            async fn list_services(&self) -> Result<Vec<DiscoveredInstance>, String> {
                Err("consul unreachable".into())
            }
        }
        let mut seed = HashMap::new();
        seed.insert("core".to_string(), "http://seed:8000".to_string());
        let registry = ServiceRegistry::seeded(seed);
        let err = registry.refresh(&FailingSource).await;
        assert!(err.is_err());
        assert_eq!(registry.lookup("core").unwrap(), "http://seed:8000");
    }
}
