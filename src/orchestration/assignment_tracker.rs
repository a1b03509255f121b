//! # Assignment Tracker
//!
//! Records each attempt to run a job on a worker. An assignment is opened
//! ASSIGNED, moves to RUNNING when the slice call begins, and is closed
//! exactly once with a terminal outcome. A retry opens a new assignment.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Assignment, AssignmentOutcome, AssignmentStatus, NewAssignment, SliceResponse, SlicingJob};
use crate::store::SchedulerStore;

#[derive(Clone)]
pub struct AssignmentTracker {
    store: Arc<dyn SchedulerStore>,
}

impl std::fmt::Debug for AssignmentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentTracker").finish()
    }
}

impl AssignmentTracker {
    pub fn new(store: Arc<dyn SchedulerStore>) -> Self {
        Self { store }
    }

    /// Open an ASSIGNED record for `job` on `worker_id`.
    ///
    /// Fails with `InvalidState` if the job already has an active assignment.
    pub async fn open(&self, job: &SlicingJob, worker_id: i64, assigned_at: DateTime<Utc>) -> Result<Assignment> {
        let retry_count = self.store.list_assignments_for_job(job.id).await?.len();
        let assignment = self
            .store
            .insert_assignment(NewAssignment {
                job_id: job.id,
                worker_id,
                assigned_at,
                priority: job.priority,
                queue_wait_seconds: job.seconds_waiting_at(assigned_at),
                retry_count: i32::try_from(retry_count).unwrap_or(i32::MAX),
            })
            .await?;

        debug!(
            assignment_id = assignment.id,
            job_id = job.id,
            worker_id = worker_id,
            retry_count = assignment.retry_count,
            queue_wait_seconds = assignment.queue_wait_seconds,
            "Opened assignment"
        );
        Ok(assignment)
    }

    /// ASSIGNED -> RUNNING, mirrored onto `assignment` when it applies
    pub async fn mark_running(&self, assignment: &mut Assignment, started_at: DateTime<Utc>) -> Result<bool> {
        let applied = self.store.mark_assignment_running(assignment.id, started_at).await?;
        if applied {
            assignment.status = AssignmentStatus::Running;
            assignment.started_at = Some(started_at);
        } else {
            warn!(assignment_id = assignment.id, status = %assignment.status, "Assignment was not ASSIGNED");
        }
        Ok(applied)
    }

    pub async fn complete(
        &self,
        assignment: &Assignment,
        response: &SliceResponse,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = AssignmentOutcome::completed(completed_at, response.size_bytes, response.line_count)
            .timed_from(assignment.started_at);
        self.close(assignment, outcome).await
    }

    pub async fn fail(&self, assignment: &Assignment, error: &str, completed_at: DateTime<Utc>) -> Result<bool> {
        let outcome = AssignmentOutcome::failed(completed_at, error).timed_from(assignment.started_at);
        self.close(assignment, outcome).await
    }

    pub async fn cancel(&self, assignment: &Assignment, reason: &str, completed_at: DateTime<Utc>) -> Result<bool> {
        self.close(assignment, AssignmentOutcome::cancelled(completed_at, reason))
            .await
    }

    /// Fail whatever attempt is still active for `job_id`, returning it
    pub async fn fail_active_for_job(
        &self,
        job_id: i64,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        let Some(active) = self.store.find_active_assignment(job_id).await? else {
            return Ok(None);
        };
        self.fail(&active, error, completed_at).await?;
        Ok(Some(active))
    }

    async fn close(&self, assignment: &Assignment, outcome: AssignmentOutcome) -> Result<bool> {
        let applied = self.store.finish_assignment(assignment.id, &outcome).await?;
        if applied {
            debug!(
                assignment_id = assignment.id,
                job_id = assignment.job_id,
                status = %outcome.status,
                execution_seconds = ?outcome.execution_seconds,
                "Closed assignment"
            );
        } else {
            debug!(assignment_id = assignment.id, "Assignment already terminal, outcome dropped");
        }
        Ok(applied)
    }
}
