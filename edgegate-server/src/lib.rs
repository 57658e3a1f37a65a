//! The edgegate binary's wiring: config, tracing, CORS, the discovery refresh
//! loop and graceful shutdown, assembled around `edgegate_core::Gateway`'s single
//! ordered initialisation sequence (metrics sink -> registry -> breaker table ->
//! admission table -> upstream client -> health monitor).
//! Kept as a library so the wiring is testable independently of `main`'s process
//! lifecycle.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use edgegate_consul::ConsulDiscoverySource;
use edgegate_core::registry::DiscoverySource;
use edgegate_core::Gateway;
use edgegate_postgres::{PostgresConfig, PostgresHealthStore};
use edgegate_prometheus::PrometheusSink;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use config::GatewayConfig;

/// Builds the `Gateway`, trying to connect to Postgres first and falling back
/// to the in-memory store on failure (so the gateway still boots — and the
/// dataplane still works — without a configured database; only `/health/tests`
/// and `/health/dashboard` history are affected).
pub async fn build_gateway(config: &GatewayConfig) -> Arc<Gateway> {
    let metrics = Arc::new(PrometheusSink::new(prometheus::Registry::new()).expect("metrics registry registers cleanly"));

    let pg_config = PostgresConfig::from_env();
    let health_store: Arc<dyn edgegate_core::health::HealthStore> = match PostgresHealthStore::connect(&pg_config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "failed to connect to postgres; falling back to in-memory health store");
            Arc::new(edgegate_core::health::InMemoryHealthStore::default())
        }
    };

    Arc::new(Gateway::with_backends(config.seed_services.clone(), metrics, health_store))
}

/// `tower_http::cors::CorsLayer` with a configurable allowed origin, credentials
/// allowed, all methods, all headers, preflight cached 1800s.
pub fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let origin: HeaderValue = config
        .cors_allowed_origin
        .parse()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:3000"));

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(1800))
}

/// Spawns the background discovery refresh task: calls `registry.refresh`
/// every `service_cache_ttl`. Failures are logged and leave the previous
/// snapshot in place (the registry's own contract); this task never exits on a
/// single failed round.
pub fn spawn_discovery_refresh(
    gateway: Arc<Gateway>,
    source: ConsulDiscoverySource,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
            match gateway.registry.refresh(&source as &dyn DiscoverySource).await {
                Ok(count) => tracing::info!(count, "refreshed service registry from consul"),
                Err(e) => tracing::error!(error = %e, "failed to refresh service registry"),
            }
        }
    })
}

/// Waits for Ctrl+C or SIGTERM, for `axum::serve(...).with_graceful_shutdown`.
/// Also cancels `cancel` so the discovery refresh loop and health monitor stop
/// cooperatively.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    cancel.cancel();
}
