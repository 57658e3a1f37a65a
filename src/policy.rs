//! Per-service policy configuration, exposed as explicit data rather than
//! inline per-service `if` chains scattered through the call sites that need it.

use std::collections::HashMap;
use std::time::Duration;

/// Breaker + admission + timeout policy for one service. A missing service
/// falls back to [`ServicePolicy::default`].
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    /// Consecutive-ish failures in `closed` state before tripping to `open`.
    pub failure_threshold: usize,
    /// Nominal open dwell before the first half-open attempt.
    pub base_timeout: Duration,
    /// Successes required in `half_open` before transitioning to `closed`.
    pub success_threshold: usize,
    /// Deadline applied to non-SSE upstream calls for this service.
    pub request_timeout: Duration,
    /// Multiplier driving progressive backoff growth; see `effective_dwell`.
    pub backoff_factor: f64,
    /// Bounded concurrency admitted for this service (non-SSE requests only).
    pub admission_capacity: usize,
    /// Whether an upstream 4xx should count as a breaker failure. Defaults to
    /// `false` (only 5xx and transport errors trip the breaker); services that
    /// want strict client-error accounting can opt in per-service.
    pub count_4xx_as_failure: bool,
}

impl ServicePolicy {
    pub fn default_policy() -> Self {
        Self {
            failure_threshold: 5,
            base_timeout: Duration::from_secs(30),
            success_threshold: 2,
            request_timeout: Duration::from_secs_f64(20.0),
            backoff_factor: 1.0,
            admission_capacity: 20,
            count_4xx_as_failure: false,
        }
    }

    fn image_or_video() -> Self {
        Self {
            failure_threshold: 8,
            base_timeout: Duration::from_secs(45),
            success_threshold: 3,
            request_timeout: Duration::from_secs_f64(60.0),
            backoff_factor: 1.5,
            admission_capacity: 5,
            count_4xx_as_failure: false,
        }
    }

    fn core() -> Self {
        Self {
            failure_threshold: 5,
            base_timeout: Duration::from_secs(15),
            success_threshold: 2,
            request_timeout: Duration::from_secs_f64(25.0),
            backoff_factor: 1.2,
            admission_capacity: 100,
            count_4xx_as_failure: false,
        }
    }
}

/// Table mapping service name to its [`ServicePolicy`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    entries: HashMap<String, ServicePolicy>,
    default: ServicePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert("image".to_string(), ServicePolicy::image_or_video());
        entries.insert("video".to_string(), ServicePolicy::image_or_video());
        entries.insert("core".to_string(), ServicePolicy::core());
        // video's bulkhead is narrower than image's despite sharing breaker policy.
        if let Some(video) = entries.get_mut("video") {
            video.admission_capacity = 3;
        }
        Self { entries, default: ServicePolicy::default_policy() }
    }
}

impl PolicyTable {
    pub fn get(&self, service: &str) -> ServicePolicy {
        self.entries.get(service).cloned().unwrap_or_else(|| self.default.clone())
    }

    /// Register or override a service's policy (used by deployment config).
    pub fn insert(&mut self, service: impl Into<String>, policy: ServicePolicy) {
        self.entries.insert(service.into(), policy);
    }
}
