//! Environment-driven configuration, assembled into one [`GatewayConfig`]
//! covering Consul host/port, CORS origin and DB_* variables, loaded with
//! `envy` rather than a hand-rolled `std::env::var` chain for every field.

use std::collections::HashMap;

use serde::Deserialize;

/// Known service names seeded from `{NAME}_SERVICE_URL` at boot, so `/services`
/// and the health monitor have something to work with before the first Consul
/// refresh completes. Covers every service the health monitor has bespoke
/// probes for, plus the policy table's named services.
const KNOWN_SERVICE_NAMES: &[&str] = &["user", "core", "image", "video", "audio"];

#[derive(Debug, Clone, Deserialize)]
struct RawEnvConfig {
    #[serde(default = "default_consul_host")]
    consul_host: String,
    #[serde(default = "default_consul_port")]
    consul_port: u16,
    #[serde(default)]
    container_env: Option<String>,
    #[serde(default = "default_cors_origin")]
    cors_allowed_origin: String,
    #[serde(default = "default_service_cache_ttl")]
    service_cache_ttl_seconds: u64,
    #[serde(default = "default_bind_addr")]
    bind_addr: String,
}

fn default_consul_host() -> String {
    edgegate_consul::DEFAULT_CONSUL_HOST.to_string()
}
fn default_consul_port() -> u16 {
    edgegate_consul::DEFAULT_CONSUL_PORT
}
fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}
fn default_service_cache_ttl() -> u64 {
    300
}
fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

/// The gateway's fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub consul_host: String,
    pub consul_port: u16,
    pub container_env: bool,
    pub cors_allowed_origin: String,
    pub service_cache_ttl: std::time::Duration,
    pub bind_addr: String,
    /// `{NAME}_SERVICE_URL` values resolved at boot for [`KNOWN_SERVICE_NAMES`].
    pub seed_services: HashMap<String, String>,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw: RawEnvConfig = envy::from_env().map_err(|e| anyhow::anyhow!("invalid environment configuration: {e}"))?;

        let seed_services = KNOWN_SERVICE_NAMES
            .iter()
            .filter_map(|name| {
                let var = format!("{}_SERVICE_URL", name.to_uppercase());
                std::env::var(&var).ok().map(|url| (name.to_string(), url))
            })
            .collect();

        Ok(Self {
            consul_host: raw.consul_host,
            consul_port: raw.consul_port,
            container_env: raw.container_env.as_deref() == Some("1"),
            cors_allowed_origin: raw.cors_allowed_origin,
            service_cache_ttl: std::time::Duration::from_secs(raw.service_cache_ttl_seconds),
            bind_addr: raw.bind_addr,
            seed_services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_the_original_gateways_literals() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["CONSUL_HOST", "CONSUL_PORT", "CONTAINER_ENV", "CORS_ALLOWED_ORIGIN", "SERVICE_CACHE_TTL_SECONDS", "BIND_ADDR", "USER_SERVICE_URL"] {
            std::env::remove_var(var);
        }
        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.consul_host, "consul");
        assert_eq!(config.consul_port, 8500);
        assert!(!config.container_env);
        assert_eq!(config.cors_allowed_origin, "http://localhost:3000");
        assert_eq!(config.service_cache_ttl, std::time::Duration::from_secs(300));
    }

    #[test]
    fn seeds_known_services_from_their_env_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("USER_SERVICE_URL", "http://user_service:8002");
        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.seed_services.get("user").unwrap(), "http://user_service:8002");
        std::env::remove_var("USER_SERVICE_URL");
    }
}
