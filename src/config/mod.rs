//! # Slicer Fleet Configuration
//!
//! Typed configuration for the scheduler, health prober, load balancer, worker
//! transport, and database. Every field carries a default so a partial file
//! (or no file at all) produces a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use slicer_fleet::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ceiling = manager.config().scheduler.max_concurrent_jobs;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub load_balancer: LoadBalancerConfig,
    pub worker_client: WorkerClientConfig,
    pub database: DatabaseConfig,
}

/// Queue polling, concurrency ceiling, and stale-job recovery
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the dispatch loop does anything at all
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    /// Global ceiling on jobs in PROCESSING
    pub max_concurrent_jobs: u32,
    /// Maximum QUEUED jobs fetched per tick
    pub batch_size: u32,
    pub stale_check_interval_seconds: u64,
    pub stale_job_threshold_minutes: u64,
    /// Queue non-empty with no dispatch for this long reports degraded
    pub degraded_after_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: defaults::POLL_INTERVAL_SECONDS,
            max_concurrent_jobs: defaults::MAX_CONCURRENT_JOBS,
            batch_size: defaults::BATCH_SIZE,
            stale_check_interval_seconds: defaults::STALE_CHECK_INTERVAL_SECONDS,
            stale_job_threshold_minutes: defaults::STALE_JOB_THRESHOLD_MINUTES,
            degraded_after_seconds: defaults::DEGRADED_AFTER_SECONDS,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_secs(self.stale_check_interval_seconds)
    }

    /// Saturates at `chrono::Duration::MAX` for values chrono cannot hold
    pub fn stale_job_threshold(&self) -> chrono::Duration {
        i64::try_from(self.stale_job_threshold_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn degraded_after(&self) -> chrono::Duration {
        i64::try_from(self.degraded_after_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// How the worker registry is populated at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Probe every configured worker before dispatching anything
    #[default]
    Discovery,
    /// Load the last persisted HEALTHY set without probing
    TrustCache,
}

/// Worker health probing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_seconds: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub startup_mode: StartupMode,
    pub max_concurrent_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: defaults::HEALTH_CHECK_INTERVAL_SECONDS,
            connect_timeout_ms: defaults::HEALTH_CONNECT_TIMEOUT_MS,
            request_timeout_ms: defaults::HEALTH_REQUEST_TIMEOUT_MS,
            startup_mode: StartupMode::default(),
            max_concurrent_probes: defaults::MAX_CONCURRENT_PROBES,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Size thresholds used by the load balancer's filtering step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Jobs above this size are kept off batch workers
    pub large_job_threshold_bytes: i64,
    /// Jobs below this size prefer batch workers
    pub small_job_threshold_bytes: i64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            large_job_threshold_bytes: defaults::LARGE_JOB_THRESHOLD_BYTES,
            small_job_threshold_bytes: defaults::SMALL_JOB_THRESHOLD_BYTES,
        }
    }
}

/// Outbound slice-call transport
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerClientConfig {
    pub connect_timeout_seconds: u64,
    /// Response timeout for a whole slice call; slicing is long-running
    pub slice_timeout_seconds: u64,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: defaults::SLICE_CONNECT_TIMEOUT_SECONDS,
            slice_timeout_seconds: defaults::SLICE_TIMEOUT_SECONDS,
        }
    }
}

impl WorkerClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn slice_timeout(&self) -> Duration {
        Duration::from_secs(self.slice_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
            acquire_timeout_seconds: defaults::DATABASE_ACQUIRE_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    /// Explicit URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> ConfigResult<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| {
                ConfigurationError::missing_required_field("url", "database (or DATABASE_URL)")
            })
    }
}

impl FleetConfig {
    /// Reject values that would stall or break the scheduler
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("scheduler.poll_interval_seconds", self.scheduler.poll_interval_seconds),
            ("scheduler.stale_check_interval_seconds", self.scheduler.stale_check_interval_seconds),
            ("scheduler.stale_job_threshold_minutes", self.scheduler.stale_job_threshold_minutes),
            ("health.check_interval_seconds", self.health.check_interval_seconds),
            ("health.connect_timeout_ms", self.health.connect_timeout_ms),
            ("health.request_timeout_ms", self.health.request_timeout_ms),
            ("worker_client.slice_timeout_seconds", self.worker_client.slice_timeout_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than zero",
                ));
            }
        }

        let bounded = [
            (
                "scheduler.stale_job_threshold_minutes",
                self.scheduler.stale_job_threshold_minutes,
                defaults::MAX_STALE_JOB_THRESHOLD_MINUTES,
            ),
            (
                "scheduler.degraded_after_seconds",
                self.scheduler.degraded_after_seconds,
                defaults::MAX_DEGRADED_AFTER_SECONDS,
            ),
        ];
        for (field, value, max) in bounded {
            if value > max {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    format!("must be at most {max}"),
                ));
            }
        }

        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_jobs",
                0,
                "global concurrency ceiling must allow at least one job",
            ));
        }

        if self.scheduler.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.batch_size",
                0,
                "must fetch at least one job per tick",
            ));
        }

        if self.health.max_concurrent_probes == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.max_concurrent_probes",
                0,
                "must allow at least one probe",
            ));
        }

        let lb = &self.load_balancer;
        if lb.small_job_threshold_bytes >= lb.large_job_threshold_bytes {
            return Err(ConfigurationError::invalid_value(
                "load_balancer.small_job_threshold_bytes",
                lb.small_job_threshold_bytes,
                format!(
                    "must be below large_job_threshold_bytes ({})",
                    lb.large_job_threshold_bytes
                ),
            ));
        }

        Ok(())
    }
}
