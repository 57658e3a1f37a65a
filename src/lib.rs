#![forbid(unsafe_code)]

//! # edgegate-core
//!
//! The dataplane of `edgegate`, an HTTP API gateway that sits in front of a fleet
//! of internal microservices. This crate holds the hard engineering: a
//! per-service circuit breaker with progressive backoff, a bounded-concurrency
//! admission layer, a dual-mode upstream client (buffered vs streamed), the
//! service registry that feeds routing targets, and the active health monitor
//! that shares those same targets.
//!
//! Everything here is framework-agnostic about *discovery* and *persistence* —
//! `DiscoverySource` and `HealthStore` are traits the companion crates
//! (`edgegate-consul`, `edgegate-postgres`) implement — but the HTTP surface
//! itself (the `axum::Router` in [`routes::router`]) lives in this crate, since
//! the proxy handler's SSE/buffered branch needs to construct two different
//! response body types before the framework ever sees a `tower::Service`.
//!
//! ## Request flow
//!
//! client -> proxy handler -> registry lookup -> (SSE branch | admission+breaker
//! branch) -> upstream client -> response relay.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use edgegate_core::Gateway;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut seed = HashMap::new();
//!     seed.insert("core".to_string(), "http://core:8000".to_string());
//!     let gateway = Arc::new(Gateway::new(seed));
//!
//!     let app = edgegate_core::routes::router(gateway.clone());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
//!     // axum::serve(listener, app).await.unwrap();
//!     drop((app, listener));
//! }
//! ```

pub mod admission;
pub mod circuit;
pub mod circuit_registry;
pub mod client;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod registry;
pub mod routes;

pub mod prelude;

pub use error::ProxyError;
pub use gateway::Gateway;
