//! The `edgegate` binary: loads configuration, wires `edgegate-core`'s dataplane
//! to its Consul/Postgres/Prometheus companions, and serves the HTTP surface
//! behind CORS, tracing and graceful shutdown.

use edgegate_consul::ConsulDiscoverySource;
use edgegate_server::{build_gateway, cors_layer, shutdown_signal, spawn_discovery_refresh, GatewayConfig};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(bind_addr = %config.bind_addr, consul_host = %config.consul_host, "starting edgegate");

    let gateway = build_gateway(&config).await;
    let cancel = CancellationToken::new();

    let consul_source = ConsulDiscoverySource::new(config.consul_host.clone(), config.consul_port);
    let refresh_task =
        spawn_discovery_refresh(gateway.clone(), consul_source, config.service_cache_ttl, cancel.clone());

    let health = gateway.health.clone();
    let health_task = tokio::spawn(async move { health.start().await });

    let app = edgegate_core::routes::router(gateway.clone())
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    gateway.health.stop();
    refresh_task.abort();
    health_task.abort();
    Ok(())
}
