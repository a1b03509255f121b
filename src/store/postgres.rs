//! PostgreSQL [`SchedulerStore`].
//!
//! Every transition is one conditional `UPDATE ... WHERE status = ...`, so the
//! row itself arbitrates races between the dispatch path, the completion path,
//! and the stale-job sweep. The partial unique index on `job_assignments`
//! enforces one non-terminal assignment per job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{HealthUpdate, SchedulerStore};
use crate::config::DatabaseConfig;
use crate::error::{FleetError, Result};
use crate::models::{
    Assignment, AssignmentOutcome, JobStatus, NewAssignment, NewSlicingJob, NewWorkerContainer,
    SlicingJob, WorkerContainer, WorkerStatus, WorkerType,
};

const JOB_COLUMNS: &str = r#"
    id, model_reference, slicing_property_reference, user_id, priority,
    requires_priority, model_size_bytes, status, created_at, started_at,
    completed_at, progress_percentage, error_message, output_reference
"#;

const WORKER_COLUMNS: &str = r#"
    id, external_id, name, worker_type, host, port, status, priority,
    max_concurrent_jobs, current_active_jobs, total_jobs_processed,
    total_jobs_failed, last_health_check, last_job_started, last_job_completed,
    status_reason, slicer_version, available_memory_bytes
"#;

const ASSIGNMENT_COLUMNS: &str = r#"
    id, job_id, worker_id, assigned_at, started_at, completed_at, status,
    priority, queue_wait_seconds, execution_seconds, retry_count,
    last_error_message, result_size_bytes, result_line_count
"#;

/// Raw `worker_containers` row; the type tag and port need conversion
#[derive(Debug, FromRow)]
struct WorkerRow {
    id: i64,
    external_id: String,
    name: String,
    worker_type: String,
    host: String,
    port: i32,
    status: WorkerStatus,
    priority: i32,
    max_concurrent_jobs: i32,
    current_active_jobs: i32,
    total_jobs_processed: i64,
    total_jobs_failed: i64,
    last_health_check: Option<DateTime<Utc>>,
    last_job_started: Option<DateTime<Utc>>,
    last_job_completed: Option<DateTime<Utc>>,
    status_reason: Option<String>,
    slicer_version: Option<String>,
    available_memory_bytes: Option<i64>,
}

impl TryFrom<WorkerRow> for WorkerContainer {
    type Error = FleetError;

    fn try_from(row: WorkerRow) -> Result<Self> {
        let port = u16::try_from(row.port).map_err(|_| {
            FleetError::Database(format!("worker {} has invalid port {}", row.id, row.port))
        })?;
        Ok(WorkerContainer {
            id: row.id,
            external_id: row.external_id,
            name: row.name,
            worker_type: WorkerType::from(row.worker_type),
            host: row.host,
            port,
            status: row.status,
            priority: row.priority,
            max_concurrent_jobs: row.max_concurrent_jobs,
            current_active_jobs: row.current_active_jobs,
            total_jobs_processed: row.total_jobs_processed,
            total_jobs_failed: row.total_jobs_failed,
            last_health_check: row.last_health_check,
            last_job_started: row.last_job_started,
            last_job_completed: row.last_job_completed,
            status_reason: row.status_reason,
            slicer_version: row.slicer_version,
            available_memory_bytes: row.available_memory_bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and wrap it
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.database_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&url)
            .await
            .map_err(|e| {
                error!("Failed to connect to scheduler database: {}", e);
                FleetError::Database(format!("Connection failed: {e}"))
            })?;

        info!(
            max_connections = config.max_connections,
            "Connected to scheduler database"
        );
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FleetError::Database(format!("Migration failed: {e}")))?;
        debug!("Scheduler schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_worker_rows(&self, query: &str, status: Option<WorkerStatus>) -> Result<Vec<WorkerContainer>> {
        let mut q = sqlx::query_as::<_, WorkerRow>(query);
        if let Some(status) = status {
            q = q.bind(status.as_str());
        }
        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(WorkerContainer::try_from)
            .collect()
    }
}

#[async_trait]
impl SchedulerStore for PgStore {
    async fn insert_job(&self, job: NewSlicingJob) -> Result<SlicingJob> {
        let query = format!(
            r#"
            INSERT INTO slicing_jobs
                (model_reference, slicing_property_reference, user_id, priority,
                 requires_priority, model_size_bytes, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', COALESCE($7, NOW()))
            RETURNING {JOB_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, SlicingJob>(&query)
            .bind(&job.model_reference)
            .bind(&job.slicing_property_reference)
            .bind(job.user_id)
            .bind(job.priority)
            .bind(job.requires_priority)
            .bind(job.model_size_bytes)
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<SlicingJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM slicing_jobs WHERE id = $1");
        Ok(sqlx::query_as::<_, SlicingJob>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM slicing_jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn fetch_queued_jobs(&self, limit: u32) -> Result<Vec<SlicingJob>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM slicing_jobs
            WHERE status = 'queued'
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT $1
            "#
        );
        Ok(sqlx::query_as::<_, SlicingJob>(&query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn mark_job_processing(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slicing_jobs
            SET status = 'processing', started_at = $2, progress_percentage = 0
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(job_id)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_job(
        &self,
        job_id: i64,
        completed_at: DateTime<Utc>,
        output_reference: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slicing_jobs
            SET status = 'completed', completed_at = $2, progress_percentage = 100,
                output_reference = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(completed_at)
        .bind(output_reference)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_job(&self, job_id: i64, error_message: &str, completed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE slicing_jobs
            SET status = 'failed', completed_at = $2, error_message = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(completed_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_job_progress(&self, job_id: i64, percentage: i32) -> Result<()> {
        let result = sqlx::query("UPDATE slicing_jobs SET progress_percentage = $2 WHERE id = $1")
            .bind(job_id)
            .bind(percentage.clamp(0, 100))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FleetError::not_found("job", job_id));
        }
        Ok(())
    }

    async fn find_stale_jobs(&self, started_before: DateTime<Utc>) -> Result<Vec<SlicingJob>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM slicing_jobs
            WHERE status = 'processing' AND started_at < $1
            ORDER BY id
            "#
        );
        Ok(sqlx::query_as::<_, SlicingJob>(&query)
            .bind(started_before)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_worker(&self, worker: NewWorkerContainer) -> Result<WorkerContainer> {
        let query = format!(
            r#"
            INSERT INTO worker_containers
                (external_id, name, worker_type, host, port, status, priority, max_concurrent_jobs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {WORKER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, WorkerRow>(&query)
            .bind(&worker.external_id)
            .bind(&worker.name)
            .bind(worker.worker_type.as_str())
            .bind(&worker.host)
            .bind(i32::from(worker.port))
            .bind(worker.status.as_str())
            .bind(worker.priority)
            .bind(worker.max_concurrent_jobs)
            .fetch_one(&self.pool)
            .await?;
        WorkerContainer::try_from(row)
    }

    async fn find_worker(&self, worker_id: i64) -> Result<Option<WorkerContainer>> {
        let query = format!("SELECT {WORKER_COLUMNS} FROM worker_containers WHERE id = $1");
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?
            .map(WorkerContainer::try_from)
            .transpose()
    }

    async fn list_workers(&self) -> Result<Vec<WorkerContainer>> {
        let query = format!("SELECT {WORKER_COLUMNS} FROM worker_containers ORDER BY id");
        self.fetch_worker_rows(&query, None).await
    }

    async fn list_workers_by_status(&self, status: WorkerStatus) -> Result<Vec<WorkerContainer>> {
        let query =
            format!("SELECT {WORKER_COLUMNS} FROM worker_containers WHERE status = $1 ORDER BY id");
        self.fetch_worker_rows(&query, Some(status)).await
    }

    async fn update_worker_health(&self, worker_id: i64, update: &HealthUpdate) -> Result<WorkerContainer> {
        let query = format!(
            r#"
            UPDATE worker_containers
            SET status = $2,
                last_health_check = $3,
                status_reason = $4,
                slicer_version = COALESCE($5, slicer_version),
                available_memory_bytes = COALESCE($6, available_memory_bytes)
            WHERE id = $1
            RETURNING {WORKER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, WorkerRow>(&query)
            .bind(worker_id)
            .bind(update.status.as_str())
            .bind(update.checked_at)
            .bind(&update.reason)
            .bind(&update.slicer_version)
            .bind(update.available_memory_bytes)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FleetError::not_found("worker", worker_id))?;
        WorkerContainer::try_from(row)
    }

    async fn adjust_active_jobs(&self, worker_id: i64, delta: i32) -> Result<i32> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE worker_containers
            SET current_active_jobs =
                LEAST(GREATEST(current_active_jobs + $2, 0), max_concurrent_jobs)
            WHERE id = $1
            RETURNING current_active_jobs
            "#,
        )
        .bind(worker_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.0)
            .ok_or_else(|| FleetError::not_found("worker", worker_id))
    }

    async fn record_job_started(&self, worker_id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE worker_containers SET last_job_started = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_job_outcome(&self, worker_id: i64, success: bool, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE worker_containers
            SET total_jobs_processed = total_jobs_processed + 1,
                total_jobs_failed = total_jobs_failed + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_job_completed = $3
            WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .bind(success)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_assignment(&self, assignment: NewAssignment) -> Result<Assignment> {
        let query = format!(
            r#"
            INSERT INTO job_assignments
                (job_id, worker_id, assigned_at, status, priority, queue_wait_seconds, retry_count)
            VALUES ($1, $2, $3, 'assigned', $4, $5, $6)
            RETURNING {ASSIGNMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Assignment>(&query)
            .bind(assignment.job_id)
            .bind(assignment.worker_id)
            .bind(assignment.assigned_at)
            .bind(assignment.priority)
            .bind(assignment.queue_wait_seconds)
            .bind(assignment.retry_count)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => FleetError::InvalidState(
                    format!("job {} already has an active assignment", assignment.job_id),
                ),
                other => FleetError::from(other),
            })
    }

    async fn mark_assignment_running(&self, assignment_id: i64, started_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_assignments
            SET status = 'running', started_at = $2
            WHERE id = $1 AND status = 'assigned'
            "#,
        )
        .bind(assignment_id)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_assignment(&self, assignment_id: i64, outcome: &AssignmentOutcome) -> Result<bool> {
        if !outcome.status.is_terminal() {
            return Err(FleetError::StateTransition(format!(
                "cannot finish assignment {assignment_id} with non-terminal status {}",
                outcome.status
            )));
        }
        let result = sqlx::query(
            r#"
            UPDATE job_assignments
            SET status = $2, completed_at = $3, execution_seconds = $4,
                last_error_message = $5, result_size_bytes = $6, result_line_count = $7
            WHERE id = $1 AND status IN ('assigned', 'running')
            "#,
        )
        .bind(assignment_id)
        .bind(outcome.status.as_str())
        .bind(outcome.completed_at)
        .bind(outcome.execution_seconds)
        .bind(&outcome.error_message)
        .bind(outcome.result_size_bytes)
        .bind(outcome.result_line_count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_active_assignment(&self, job_id: i64) -> Result<Option<Assignment>> {
        let query = format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM job_assignments
            WHERE job_id = $1 AND status IN ('assigned', 'running')
            "#
        );
        Ok(sqlx::query_as::<_, Assignment>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_assignments_for_job(&self, job_id: i64) -> Result<Vec<Assignment>> {
        let query = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM job_assignments WHERE job_id = $1 ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Assignment>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?)
    }
}
