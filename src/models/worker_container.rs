use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::worker_types;

/// Worker container status enumeration matching database constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Healthy,
    Unhealthy,
    Unknown,
    /// Administratively drained; never probed or selected
    Maintenance,
    /// Administratively stopped; never probed or selected
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
            Self::Maintenance => "maintenance",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the health prober owns this status
    pub fn is_probed(&self) -> bool {
        !matches!(self, Self::Maintenance | Self::Stopped)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "unknown" => Ok(Self::Unknown),
            "maintenance" => Ok(Self::Maintenance),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid worker status: {s}")),
        }
    }
}

/// Worker type tag. The known tags carry dispatch meaning; anything else is
/// kept verbatim and treated like a standard worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerType {
    Standard,
    /// Preferred for jobs flagged as requiring priority treatment
    Priority,
    /// Reserved for small jobs
    Batch,
    Other(String),
}

impl WorkerType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => worker_types::STANDARD,
            Self::Priority => worker_types::PRIORITY,
            Self::Batch => worker_types::BATCH,
            Self::Other(tag) => tag,
        }
    }

    pub fn supports_priority(&self) -> bool {
        matches!(self, Self::Priority)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch)
    }
}

impl From<String> for WorkerType {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            worker_types::STANDARD => Self::Standard,
            worker_types::PRIORITY => Self::Priority,
            worker_types::BATCH => Self::Batch,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for WorkerType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<WorkerType> for String {
    fn from(worker_type: WorkerType) -> Self {
        worker_type.as_str().to_string()
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote slicing-engine instance.
/// Maps to `worker_containers` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContainer {
    pub id: i64,
    /// Identifier assigned by the container platform
    pub external_id: String,
    pub name: String,
    pub worker_type: WorkerType,
    pub host: String,
    pub port: u16,
    pub status: WorkerStatus,
    /// Lower is preferred
    pub priority: i32,
    pub max_concurrent_jobs: i32,
    pub current_active_jobs: i32,
    pub total_jobs_processed: i64,
    pub total_jobs_failed: i64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_job_started: Option<DateTime<Utc>>,
    pub last_job_completed: Option<DateTime<Utc>>,
    /// Reason attached to the last non-healthy probe
    pub status_reason: Option<String>,
    /// Slicer version reported by the last healthy probe
    pub slicer_version: Option<String>,
    /// Free memory reported by the last healthy probe
    pub available_memory_bytes: Option<i64>,
}

/// New worker for administrative registration (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkerContainer {
    pub external_id: String,
    pub name: String,
    pub worker_type: WorkerType,
    pub host: String,
    pub port: u16,
    pub priority: i32,
    pub max_concurrent_jobs: i32,
    pub status: WorkerStatus,
}

impl NewWorkerContainer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self {
            external_id: name.clone(),
            name,
            worker_type: WorkerType::Standard,
            host: host.into(),
            port,
            priority: 1,
            max_concurrent_jobs: 1,
            status: WorkerStatus::Unknown,
        }
    }

    pub fn with_type(mut self, worker_type: impl Into<WorkerType>) -> Self {
        self.worker_type = worker_type.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capacity(mut self, max_concurrent_jobs: i32) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }
}

impl WorkerContainer {
    /// Base URL of the worker's HTTP API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_active_jobs < self.max_concurrent_jobs
    }

    /// HEALTHY and below its concurrency cap
    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Healthy && self.has_capacity()
    }

    /// Current load as a percentage of capacity
    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent_jobs <= 0 {
            return 100.0;
        }
        self.current_active_jobs as f64 / self.max_concurrent_jobs as f64 * 100.0
    }

    /// Share of processed jobs that succeeded; a worker with no history is
    /// assumed fully healthy
    pub fn success_rate(&self) -> f64 {
        if self.total_jobs_processed <= 0 {
            return 100.0;
        }
        let succeeded = (self.total_jobs_processed - self.total_jobs_failed).max(0);
        succeeded as f64 / self.total_jobs_processed as f64 * 100.0
    }

    /// Clamp an active-job count into `0..=max_concurrent_jobs`
    pub fn clamp_active_jobs(&self, value: i32) -> i32 {
        value.clamp(0, self.max_concurrent_jobs.max(0))
    }
}
