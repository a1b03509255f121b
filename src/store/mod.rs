//! # Scheduler Store
//!
//! The persistence contract the scheduler, registry, and prober depend on.
//! Every state-changing method is a single atomic write keyed by id, and
//! the conditional ones report whether they applied so callers can tell a
//! lost race from a successful transition.
//!
//! - [`InMemoryStore`] - process-local implementation (tests, single-node runs)
//! - [`PgStore`] - PostgreSQL implementation over sqlx

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{
    Assignment, AssignmentOutcome, JobStatus, NewAssignment, NewSlicingJob, NewWorkerContainer,
    SlicingJob, WorkerContainer, WorkerStatus,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// One health-probe result, written as a single update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub status: WorkerStatus,
    pub checked_at: DateTime<Utc>,
    /// Why the worker is not healthy
    pub reason: Option<String>,
    pub slicer_version: Option<String>,
    pub available_memory_bytes: Option<i64>,
}

impl HealthUpdate {
    pub fn healthy(
        checked_at: DateTime<Utc>,
        slicer_version: Option<String>,
        available_memory_bytes: Option<i64>,
    ) -> Self {
        Self {
            status: WorkerStatus::Healthy,
            checked_at,
            reason: None,
            slicer_version,
            available_memory_bytes,
        }
    }

    pub fn degraded(status: WorkerStatus, checked_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            status,
            checked_at,
            reason: Some(reason.into()),
            slicer_version: None,
            available_memory_bytes: None,
        }
    }

    /// Apply onto a cached worker the same way the store applies it
    pub fn apply_to(&self, worker: &mut WorkerContainer) {
        worker.status = self.status;
        worker.last_health_check = Some(self.checked_at);
        worker.status_reason = self.reason.clone();
        if self.slicer_version.is_some() {
            worker.slicer_version = self.slicer_version.clone();
        }
        if self.available_memory_bytes.is_some() {
            worker.available_memory_bytes = self.available_memory_bytes;
        }
    }
}

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    // Jobs

    async fn insert_job(&self, job: NewSlicingJob) -> Result<SlicingJob>;

    async fn find_job(&self, job_id: i64) -> Result<Option<SlicingJob>>;

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64>;

    /// QUEUED jobs ordered by priority desc, created-at asc, id asc
    async fn fetch_queued_jobs(&self, limit: u32) -> Result<Vec<SlicingJob>>;

    /// QUEUED -> PROCESSING; false if the job was not QUEUED
    async fn mark_job_processing(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<bool>;

    /// PROCESSING -> COMPLETED; false if the job was not PROCESSING
    async fn complete_job(
        &self,
        job_id: i64,
        completed_at: DateTime<Utc>,
        output_reference: Option<String>,
    ) -> Result<bool>;

    /// PROCESSING -> FAILED; false if the job was not PROCESSING
    async fn fail_job(&self, job_id: i64, error_message: &str, completed_at: DateTime<Utc>) -> Result<bool>;

    async fn update_job_progress(&self, job_id: i64, percentage: i32) -> Result<()>;

    /// PROCESSING jobs whose started-at is before `started_before`
    async fn find_stale_jobs(&self, started_before: DateTime<Utc>) -> Result<Vec<SlicingJob>>;

    // Workers

    async fn insert_worker(&self, worker: NewWorkerContainer) -> Result<WorkerContainer>;

    async fn find_worker(&self, worker_id: i64) -> Result<Option<WorkerContainer>>;

    async fn list_workers(&self) -> Result<Vec<WorkerContainer>>;

    async fn list_workers_by_status(&self, status: WorkerStatus) -> Result<Vec<WorkerContainer>>;

    /// Status, timestamp, and reported details in one write
    async fn update_worker_health(&self, worker_id: i64, update: &HealthUpdate) -> Result<WorkerContainer>;

    /// Add `delta` to the active-job count, clamped to `0..=max`; returns the new count
    async fn adjust_active_jobs(&self, worker_id: i64, delta: i32) -> Result<i32>;

    async fn record_job_started(&self, worker_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Bump processed (and failed, unless `success`) counters
    async fn record_job_outcome(&self, worker_id: i64, success: bool, at: DateTime<Utc>) -> Result<()>;

    // Assignments

    /// Fails with `InvalidState` if the job already has a non-terminal assignment
    async fn insert_assignment(&self, assignment: NewAssignment) -> Result<Assignment>;

    /// ASSIGNED -> RUNNING; false if the assignment was not ASSIGNED
    async fn mark_assignment_running(&self, assignment_id: i64, started_at: DateTime<Utc>) -> Result<bool>;

    /// Write a terminal outcome; false if the assignment was already terminal
    async fn finish_assignment(&self, assignment_id: i64, outcome: &AssignmentOutcome) -> Result<bool>;

    async fn find_active_assignment(&self, job_id: i64) -> Result<Option<Assignment>>;

    async fn list_assignments_for_job(&self, job_id: i64) -> Result<Vec<Assignment>>;
}
