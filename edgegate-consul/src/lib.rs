//! [`DiscoverySource`] implementation against Consul's HTTP catalog API.
//!
//! Drives `catalog/services` and `catalog/service/{name}` directly over
//! `reqwest`. `edgegate-core` has zero knowledge of Consul's wire format; this
//! crate is the only one that speaks it, returning the generic
//! `DiscoveredInstance` tuples [`crate::registry::ServiceRegistry::refresh`]
//! consumes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use edgegate_core::registry::{DiscoveredInstance, DiscoverySource};
use reqwest::Client;
use serde::Deserialize;

/// `CONSUL_HOST`/`CONSUL_PORT` defaults.
pub const DEFAULT_CONSUL_HOST: &str = "consul";
pub const DEFAULT_CONSUL_PORT: u16 = 8500;

/// One row of `GET /v1/catalog/service/{name}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogServiceEntry {
    address: String,
    #[serde(default)]
    service_address: String,
    service_port: u16,
}

#[derive(Clone)]
pub struct ConsulDiscoverySource {
    http: Client,
    base_url: String,
}

impl ConsulDiscoverySource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            base_url: format!("http://{}:{}", host.into(), port),
        }
    }

    /// Construct from `CONSUL_HOST`/`CONSUL_PORT`, falling back to the defaults above.
    pub fn from_env() -> Self {
        let host = std::env::var("CONSUL_HOST").unwrap_or_else(|_| DEFAULT_CONSUL_HOST.to_string());
        let port = std::env::var("CONSUL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_CONSUL_PORT);
        Self::new(host, port)
    }

    async fn list_service_names(&self) -> Result<Vec<String>, String> {
        let url = format!("{}/v1/catalog/services", self.base_url);
        let body: HashMap<String, Vec<String>> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        Ok(body.into_keys().collect())
    }

    async fn catalog_service(&self, name: &str) -> Result<Vec<CatalogServiceEntry>, String> {
        let url = format!("{}/v1/catalog/service/{}", self.base_url, name);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl DiscoverySource for ConsulDiscoverySource {
    /// Lists every service in the catalog except `consul` itself (the discovery
    /// service should never register itself as a proxyable target), with one
    /// `DiscoveredInstance` per registered instance — `ServiceRegistry::refresh`
    /// picks the first.
    async fn list_services(&self) -> Result<Vec<DiscoveredInstance>, String> {
        let names = self.list_service_names().await?;
        let mut instances = Vec::new();

        for name in names {
            if name == "consul" {
                continue;
            }
            match self.catalog_service(&name).await {
                Ok(entries) => {
                    for entry in entries {
                        instances.push(DiscoveredInstance {
                            name: name.clone(),
                            address: entry.address,
                            service_address: (!entry.service_address.is_empty())
                                .then_some(entry.service_address),
                            service_port: entry.service_port,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(service = %name, error = %e, "failed to describe service in catalog");
                }
            }
        }

        Ok(instances)
    }
}
