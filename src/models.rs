//! Wire/data-model types shared by the registry, the health monitor and the
//! HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the service registry: a logical name resolved to a live origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub base_url: String,
    pub discovered_at: DateTime<Utc>,
}

/// Status of a single health probe, serialized as `"OK"/"ERROR"/"NA"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Ok,
    Error,
    Na,
}

/// Derived status of a service as a whole: `OK` iff all tests pass, `DEGRADED`
/// iff some pass, `DOWN` iff none do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Ok,
    Degraded,
    Down,
}

/// Result of one `(service_name, test_name)` probe. Unique on that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub service_name: String,
    pub test_name: String,
    pub status: TestStatus,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub updated_at: DateTime<Utc>,
}

/// Derived per-service summary, unique on `service_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: ServiceStatus,
    pub last_successful_check: Option<DateTime<Utc>>,
    pub total_tests: u64,
    pub passing_tests: u64,
    pub updated_at: DateTime<Utc>,
}

impl ServiceHealth {
    /// Recompute `status` from `total_tests`/`passing_tests`.
    pub fn derive_status(total_tests: u64, passing_tests: u64) -> ServiceStatus {
        if total_tests == 0 || passing_tests == 0 {
            ServiceStatus::Down
        } else if passing_tests == total_tests {
            ServiceStatus::Ok
        } else {
            ServiceStatus::Degraded
        }
    }
}
