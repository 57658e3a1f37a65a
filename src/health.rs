//! Active health monitor: periodic probes against every registered service,
//! persisting per-test results and a derived per-service status.
//!
//! Every probe result is actually upserted into the [`HealthStore`] rather than
//! just logged, so `/health/tests` and `/health/dashboard` stay queryable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::UpstreamClient;
use crate::error::Outcome;
use crate::models::{ServiceHealth, TestResult, TestStatus};
use crate::registry::ServiceRegistry;

/// One probe definition: a request to run and the status codes that count as OK.
#[derive(Debug, Clone)]
pub struct ProbeDefinition {
    pub test_name: String,
    pub method: Method,
    pub path: String,
    pub expected_status: Vec<u16>,
}

impl ProbeDefinition {
    pub fn new(test_name: &str, method: Method, path: &str, expected_status: Vec<u16>) -> Self {
        Self { test_name: test_name.to_string(), method, path: path.to_string(), expected_status }
    }
}

/// Default probe list for a service: a basic `GET /health` check for everyone,
/// plus a couple of service-specific additions for endpoints known to need
/// their own liveness signal.
pub fn default_probes(service_name: &str) -> Vec<ProbeDefinition> {
    let mut probes = vec![ProbeDefinition::new("health_check", Method::GET, "/health", vec![200])];
    match service_name {
        "audio" => probes.push(ProbeDefinition::new(
            "get_voices_list",
            Method::GET,
            "/voices/project/00000000-0000-0000-0000-000000000000",
            vec![200],
        )),
        "user" => probes.push(ProbeDefinition::new("user_check", Method::GET, "/users/health", vec![200])),
        _ => {}
    }
    probes
}

/// Persists [`TestResult`]s and [`ServiceHealth`] summaries. `edgegate-postgres`
/// implements this against `api_health_tests`/`api_health_checks`; tests use an
/// in-memory stub.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn upsert_test_result(&self, result: TestResult) -> Result<(), String>;
    async fn upsert_service_health(&self, health: ServiceHealth) -> Result<(), String>;
    async fn list_test_results(
        &self,
        service: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TestResult>, usize), String>;
    async fn dashboard(&self) -> Result<Vec<ServiceHealth>, String>;

    /// Liveness check for `/health/detail`'s database component. Defaults to
    /// always-healthy; `edgegate-postgres` overrides with a real `SELECT 1`.
    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }
}

/// In-memory [`HealthStore`], used by `edgegate-server` when no database is
/// configured and by the core's own tests.
#[derive(Default)]
pub struct InMemoryHealthStore {
    tests: std::sync::Mutex<HashMap<(String, String), TestResult>>,
    services: std::sync::Mutex<HashMap<String, ServiceHealth>>,
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn upsert_test_result(&self, result: TestResult) -> Result<(), String> {
        let key = (result.service_name.clone(), result.test_name.clone());
        self.tests.lock().expect("health store poisoned").insert(key, result);
        Ok(())
    }

    async fn upsert_service_health(&self, health: ServiceHealth) -> Result<(), String> {
        self.services
            .lock()
            .expect("health store poisoned")
            .insert(health.service_name.clone(), health);
        Ok(())
    }

    async fn list_test_results(
        &self,
        service: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TestResult>, usize), String> {
        let tests = self.tests.lock().expect("health store poisoned");
        let mut matching: Vec<TestResult> = tests
            .values()
            .filter(|t| service.map(|s| s == t.service_name).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.service_name.cmp(&b.service_name).then(a.test_name.cmp(&b.test_name)));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn dashboard(&self) -> Result<Vec<ServiceHealth>, String> {
        Ok(self.services.lock().expect("health store poisoned").values().cloned().collect())
    }
}

/// Timing constants for the monitor loop.
pub struct MonitorSchedule {
    pub initial_delay: Duration,
    pub accelerated_period: Duration,
    pub accelerated_interval: Duration,
    pub interval: Duration,
    pub inter_probe_pause: Duration,
    pub probe_deadline: Duration,
}

impl Default for MonitorSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            accelerated_period: Duration::from_secs(300),
            accelerated_interval: Duration::from_secs(30),
            interval: Duration::from_secs(3600),
            inter_probe_pause: Duration::from_millis(500),
            probe_deadline: Duration::from_secs(10),
        }
    }
}

/// The monitor loop. Owns its own [`UpstreamClient`] call path — it bypasses the
/// breaker and admission layer entirely, since health checks observe ground truth
/// rather than feeding the circuit.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn HealthStore>,
    client: UpstreamClient,
    schedule: MonitorSchedule,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, store: Arc<dyn HealthStore>) -> Self {
        Self {
            registry,
            store,
            client: UpstreamClient::new(),
            schedule: MonitorSchedule::default(),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// `services_monitored` for `/health/status`: every service the registry
    /// currently knows about, resolved live on each call rather than a snapshot
    /// frozen at `start()` time.
    pub fn services_monitored(&self) -> Vec<String> {
        self.registry.service_names()
    }

    pub fn store(&self) -> &Arc<dyn HealthStore> {
        &self.store
    }

    pub async fn test_results(
        &self,
        service: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TestResult>, usize), String> {
        self.store.list_test_results(service, limit, offset).await
    }

    pub async fn dashboard(&self) -> Result<Vec<ServiceHealth>, String> {
        self.store.dashboard().await
    }

    /// Cooperative cancellation, checked between probes and between iterations,
    /// never mid-probe.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run every probe of every service once. Exposed standalone so
    /// `/health/run-tests` can trigger an out-of-band pass without waiting for the
    /// loop's own timer.
    pub async fn run_all_tests(&self) {
        let services = self.registry.snapshot();
        for service in services {
            for probe in default_probes(&service.name) {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.run_one_test(&service.name, &service.base_url, &probe).await;
                tokio::time::sleep(self.schedule.inter_probe_pause).await;
            }
            self.recompute_service_summary(&service.name).await;
        }
    }

    async fn run_one_test(&self, service_name: &str, base_url: &str, probe: &ProbeDefinition) {
        let url = format!("{base_url}{}", probe.path);
        let started = Instant::now();
        let outcome = self.client.probe(probe.method.clone(), &url, self.schedule.probe_deadline).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error_message) = match outcome {
            Outcome::Response { status, .. } => {
                if probe.expected_status.contains(&status.as_u16()) {
                    (TestStatus::Ok, None)
                } else {
                    (TestStatus::Error, Some(format!("unexpected status code: {status}")))
                }
            }
            Outcome::Timeout => (TestStatus::Error, Some("request timed out".to_string())),
            Outcome::ConnectError(cause) | Outcome::Other(cause) => (TestStatus::Error, Some(cause)),
        };

        let result = TestResult {
            service_name: service_name.to_string(),
            test_name: probe.test_name.clone(),
            status,
            error_message,
            duration_ms,
            updated_at: Utc::now(),
        };

        if let Err(e) = self.store.upsert_test_result(result).await {
            tracing::error!(service = service_name, test = %probe.test_name, error = %e, "failed to persist health test result");
        }
    }

    async fn recompute_service_summary(&self, service_name: &str) {
        let (results, _total) = match self.store.list_test_results(Some(service_name), usize::MAX, 0).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(service = service_name, error = %e, "failed to read back test results");
                return;
            }
        };

        let total_tests = results.len() as u64;
        let passing_tests = results.iter().filter(|r| r.status == TestStatus::Ok).count() as u64;
        let last_successful_check =
            results.iter().filter(|r| r.status == TestStatus::Ok).map(|r| r.updated_at).max();

        let health = ServiceHealth {
            service_name: service_name.to_string(),
            status: ServiceHealth::derive_status(total_tests, passing_tests),
            last_successful_check,
            total_tests,
            passing_tests,
            updated_at: Utc::now(),
        };

        if let Err(e) = self.store.upsert_service_health(health).await {
            tracing::error!(service = service_name, error = %e, "failed to persist service health summary");
        }
    }

    /// `start_monitoring`: sleep `initial_delay`, then loop: run every probe of
    /// every service, sleep `accelerated_interval` for the first
    /// `accelerated_period` of loop time, then `interval` thereafter.
    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::warn!("health monitoring is already running");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.schedule.initial_delay) => {}
            _ = self.cancel.cancelled() => {
                self.running.store(false, Ordering::Release);
                return;
            }
        }

        let loop_start = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.run_all_tests().await;

            let next_interval = if loop_start.elapsed() < self.schedule.accelerated_period {
                self.schedule.accelerated_interval
            } else {
                self.schedule.interval
            };

            tokio::select! {
                _ = tokio::time::sleep(next_interval) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
        self.running.store(false, Ordering::Release);
    }
}
