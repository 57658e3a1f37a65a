//! [`HealthStore`] implementation against PostgreSQL, backed by the
//! `api_health_tests` / `api_health_checks` tables.
//!
//! The schema mirrors a `TestResult`/`ServiceHealth` pair of models: one row per
//! `(service_name, test_name)` probe result, one row per service-level summary.
//! This crate treats the schema as authoritative and implements the upsert for
//! real rather than just logging it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgegate_core::health::HealthStore;
use edgegate_core::models::{ServiceHealth, ServiceStatus, TestResult, TestStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// `DB_HOST`/`DB_PORT`/`DB_NAME`/`DB_USER`/`DB_PASSWORD` defaults.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "gateway_db".to_string(),
            port: 5432,
            database: "gateway".to_string(),
            user: "user".to_string(),
            password: "password".to_string(),
        }
    }
}

impl PostgresConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("DB_HOST").unwrap_or(default.host),
            port: std::env::var("DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(default.port),
            database: std::env::var("DB_NAME").unwrap_or(default.database),
            user: std::env::var("DB_USER").unwrap_or(default.user),
            password: std::env::var("DB_PASSWORD").unwrap_or(default.password),
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

pub struct PostgresHealthStore {
    pool: PgPool,
}

impl PostgresHealthStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(&config.connection_string()).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates `api_health_tests`/`api_health_checks` if absent, with the unique
    /// constraints and indexes the query layer relies on. Idempotent so it can
    /// run on every boot instead of requiring a separate migration step.
    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_health_tests (
                id BIGSERIAL PRIMARY KEY,
                service_name TEXT NOT NULL,
                test_name TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                duration_ms BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (service_name, test_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_api_health_tests_service_name ON api_health_tests (service_name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_api_health_tests_updated_at ON api_health_tests (updated_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_health_checks (
                id BIGSERIAL PRIMARY KEY,
                service_name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                last_successful_check TIMESTAMPTZ,
                total_tests BIGINT NOT NULL,
                passing_tests BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn test_status_to_str(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Ok => "OK",
        TestStatus::Error => "ERROR",
        TestStatus::Na => "NA",
    }
}

fn test_status_from_str(s: &str) -> TestStatus {
    match s {
        "OK" => TestStatus::Ok,
        "ERROR" => TestStatus::Error,
        _ => TestStatus::Na,
    }
}

fn service_status_to_str(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Ok => "OK",
        ServiceStatus::Degraded => "DEGRADED",
        ServiceStatus::Down => "DOWN",
    }
}

fn service_status_from_str(s: &str) -> ServiceStatus {
    match s {
        "OK" => ServiceStatus::Ok,
        "DEGRADED" => ServiceStatus::Degraded,
        _ => ServiceStatus::Down,
    }
}

#[async_trait]
impl HealthStore for PostgresHealthStore {
    async fn upsert_test_result(&self, result: TestResult) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO api_health_tests
                (service_name, test_name, status, error_message, duration_ms, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (service_name, test_name) DO UPDATE SET
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                duration_ms = EXCLUDED.duration_ms,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&result.service_name)
        .bind(&result.test_name)
        .bind(test_status_to_str(result.status))
        .bind(&result.error_message)
        .bind(result.duration_ms as i64)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn upsert_service_health(&self, health: ServiceHealth) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO api_health_checks
                (service_name, status, last_successful_check, total_tests, passing_tests, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (service_name) DO UPDATE SET
                status = EXCLUDED.status,
                last_successful_check = EXCLUDED.last_successful_check,
                total_tests = EXCLUDED.total_tests,
                passing_tests = EXCLUDED.passing_tests,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&health.service_name)
        .bind(service_status_to_str(health.status))
        .bind(health.last_successful_check)
        .bind(health.total_tests as i64)
        .bind(health.passing_tests as i64)
        .bind(health.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn list_test_results(
        &self,
        service: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TestResult>, usize), String> {
        let total: i64 = if let Some(service) = service {
            sqlx::query_scalar("SELECT COUNT(*) FROM api_health_tests WHERE service_name = $1")
                .bind(service)
                .fetch_one(&self.pool)
                .await
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM api_health_tests")
                .fetch_one(&self.pool)
                .await
        }
        .map_err(|e| e.to_string())?;

        let rows = if let Some(service) = service {
            sqlx::query(
                "SELECT service_name, test_name, status, error_message, duration_ms, updated_at \
                 FROM api_health_tests WHERE service_name = $1 \
                 ORDER BY service_name, test_name LIMIT $2 OFFSET $3",
            )
            .bind(service)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT service_name, test_name, status, error_message, duration_ms, updated_at \
                 FROM api_health_tests ORDER BY service_name, test_name LIMIT $1 OFFSET $2",
            )
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| e.to_string())?;

        let results = rows
            .into_iter()
            .map(|row| TestResult {
                service_name: row.get("service_name"),
                test_name: row.get("test_name"),
                status: test_status_from_str(row.get("status")),
                error_message: row.get("error_message"),
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            })
            .collect();

        Ok((results, total as usize))
    }

    async fn dashboard(&self) -> Result<Vec<ServiceHealth>, String> {
        let rows = sqlx::query(
            "SELECT service_name, status, last_successful_check, total_tests, passing_tests, updated_at \
             FROM api_health_checks ORDER BY service_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(rows
            .into_iter()
            .map(|row| ServiceHealth {
                service_name: row.get("service_name"),
                status: service_status_from_str(row.get("status")),
                last_successful_check: row.get("last_successful_check"),
                total_tests: row.get::<i64, _>("total_tests") as u64,
                passing_tests: row.get::<i64, _>("passing_tests") as u64,
                updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), String> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| e.to_string())?;
        Ok(())
    }
}
