//! Process-local [`SchedulerStore`] backed by concurrent maps.
//!
//! Per-record updates go through the map's entry lock, so each conditional
//! transition is atomic with respect to concurrent callers. Assignment
//! inserts hold one mutex so the "one active assignment per job" check and
//! the insert happen together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{HealthUpdate, SchedulerStore};
use crate::error::{FleetError, Result};
use crate::models::{
    Assignment, AssignmentOutcome, AssignmentStatus, JobStatus, NewAssignment, NewSlicingJob,
    NewWorkerContainer, SlicingJob, WorkerContainer, WorkerStatus,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: DashMap<i64, SlicingJob>,
    workers: DashMap<i64, WorkerContainer>,
    assignments: Mutex<BTreeMap<i64, Assignment>>,
    next_job_id: AtomicI64,
    next_worker_id: AtomicI64,
    next_assignment_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Overwrite a job record wholesale (fixtures, admin tooling)
    pub fn put_job(&self, job: SlicingJob) {
        self.next_job_id.fetch_max(job.id, Ordering::SeqCst);
        self.jobs.insert(job.id, job);
    }

    /// Every assignment in creation order
    pub fn all_assignments(&self) -> Vec<Assignment> {
        self.assignments.lock().values().cloned().collect()
    }

    /// Move a job to `next` if its current status allows it
    fn transition_job<F>(&self, job_id: i64, next: JobStatus, apply: F) -> bool
    where
        F: FnOnce(&mut SlicingJob),
    {
        match self.jobs.get_mut(&job_id) {
            Some(mut job) if job.status.can_transition_to(next) => {
                job.status = next;
                apply(&mut job);
                true
            }
            _ => false,
        }
    }

    fn worker_mut(&self, worker_id: i64) -> Result<dashmap::mapref::one::RefMut<'_, i64, WorkerContainer>> {
        self.workers
            .get_mut(&worker_id)
            .ok_or_else(|| FleetError::not_found("worker", worker_id))
    }
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    async fn insert_job(&self, new_job: NewSlicingJob) -> Result<SlicingJob> {
        let job = SlicingJob {
            id: Self::next_id(&self.next_job_id),
            model_reference: new_job.model_reference,
            slicing_property_reference: new_job.slicing_property_reference,
            user_id: new_job.user_id,
            priority: new_job.priority,
            requires_priority: new_job.requires_priority,
            model_size_bytes: new_job.model_size_bytes,
            status: JobStatus::Queued,
            created_at: new_job.created_at.unwrap_or_else(Utc::now),
            started_at: None,
            completed_at: None,
            progress_percentage: 0,
            error_message: None,
            output_reference: None,
        };
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<SlicingJob>> {
        Ok(self.jobs.get(&job_id).map(|job| job.clone()))
    }

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64> {
        Ok(self.jobs.iter().filter(|job| job.status == status).count() as i64)
    }

    async fn fetch_queued_jobs(&self, limit: u32) -> Result<Vec<SlicingJob>> {
        let mut queued: Vec<SlicingJob> = self
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Queued)
            .map(|job| job.clone())
            .collect();
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        queued.truncate(limit as usize);
        Ok(queued)
    }

    async fn mark_job_processing(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<bool> {
        Ok(self.transition_job(job_id, JobStatus::Processing, |job| {
            job.started_at = Some(started_at);
            job.progress_percentage = 0;
        }))
    }

    async fn complete_job(
        &self,
        job_id: i64,
        completed_at: DateTime<Utc>,
        output_reference: Option<String>,
    ) -> Result<bool> {
        Ok(self.transition_job(job_id, JobStatus::Completed, |job| {
            job.completed_at = Some(completed_at);
            job.progress_percentage = 100;
            job.output_reference = output_reference;
        }))
    }

    async fn fail_job(&self, job_id: i64, error_message: &str, completed_at: DateTime<Utc>) -> Result<bool> {
        Ok(self.transition_job(job_id, JobStatus::Failed, |job| {
            job.completed_at = Some(completed_at);
            job.error_message = Some(error_message.to_string());
        }))
    }

    async fn update_job_progress(&self, job_id: i64, percentage: i32) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| FleetError::not_found("job", job_id))?;
        job.progress_percentage = percentage.clamp(0, 100);
        Ok(())
    }

    async fn find_stale_jobs(&self, started_before: DateTime<Utc>) -> Result<Vec<SlicingJob>> {
        let mut stale: Vec<SlicingJob> = self
            .jobs
            .iter()
            .filter(|job| job.is_stale(started_before))
            .map(|job| job.clone())
            .collect();
        stale.sort_by_key(|job| job.id);
        Ok(stale)
    }

    async fn insert_worker(&self, new_worker: NewWorkerContainer) -> Result<WorkerContainer> {
        let worker = WorkerContainer {
            id: Self::next_id(&self.next_worker_id),
            external_id: new_worker.external_id,
            name: new_worker.name,
            worker_type: new_worker.worker_type,
            host: new_worker.host,
            port: new_worker.port,
            status: new_worker.status,
            priority: new_worker.priority,
            max_concurrent_jobs: new_worker.max_concurrent_jobs,
            current_active_jobs: 0,
            total_jobs_processed: 0,
            total_jobs_failed: 0,
            last_health_check: None,
            last_job_started: None,
            last_job_completed: None,
            status_reason: None,
            slicer_version: None,
            available_memory_bytes: None,
        };
        self.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn find_worker(&self, worker_id: i64) -> Result<Option<WorkerContainer>> {
        Ok(self.workers.get(&worker_id).map(|worker| worker.clone()))
    }

    async fn list_workers(&self) -> Result<Vec<WorkerContainer>> {
        let mut workers: Vec<WorkerContainer> =
            self.workers.iter().map(|worker| worker.clone()).collect();
        workers.sort_by_key(|worker| worker.id);
        Ok(workers)
    }

    async fn list_workers_by_status(&self, status: WorkerStatus) -> Result<Vec<WorkerContainer>> {
        Ok(self
            .list_workers()
            .await?
            .into_iter()
            .filter(|worker| worker.status == status)
            .collect())
    }

    async fn update_worker_health(&self, worker_id: i64, update: &HealthUpdate) -> Result<WorkerContainer> {
        let mut worker = self.worker_mut(worker_id)?;
        update.apply_to(&mut worker);
        Ok(worker.clone())
    }

    async fn adjust_active_jobs(&self, worker_id: i64, delta: i32) -> Result<i32> {
        let mut worker = self.worker_mut(worker_id)?;
        let next = worker.clamp_active_jobs(worker.current_active_jobs.saturating_add(delta));
        worker.current_active_jobs = next;
        Ok(next)
    }

    async fn record_job_started(&self, worker_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.worker_mut(worker_id)?.last_job_started = Some(at);
        Ok(())
    }

    async fn record_job_outcome(&self, worker_id: i64, success: bool, at: DateTime<Utc>) -> Result<()> {
        let mut worker = self.worker_mut(worker_id)?;
        worker.total_jobs_processed += 1;
        if !success {
            worker.total_jobs_failed += 1;
        }
        worker.last_job_completed = Some(at);
        Ok(())
    }

    async fn insert_assignment(&self, new_assignment: NewAssignment) -> Result<Assignment> {
        let mut assignments = self.assignments.lock();
        if assignments
            .values()
            .any(|a| a.job_id == new_assignment.job_id && a.status.is_active())
        {
            return Err(FleetError::InvalidState(format!(
                "job {} already has an active assignment",
                new_assignment.job_id
            )));
        }

        let assignment = Assignment {
            id: Self::next_id(&self.next_assignment_id),
            job_id: new_assignment.job_id,
            worker_id: new_assignment.worker_id,
            assigned_at: new_assignment.assigned_at,
            started_at: None,
            completed_at: None,
            status: AssignmentStatus::Assigned,
            priority: new_assignment.priority,
            queue_wait_seconds: new_assignment.queue_wait_seconds,
            execution_seconds: None,
            retry_count: new_assignment.retry_count,
            last_error_message: None,
            result_size_bytes: None,
            result_line_count: None,
        };
        assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn mark_assignment_running(&self, assignment_id: i64, started_at: DateTime<Utc>) -> Result<bool> {
        let mut assignments = self.assignments.lock();
        match assignments.get_mut(&assignment_id) {
            Some(a) if a.status == AssignmentStatus::Assigned => {
                a.status = AssignmentStatus::Running;
                a.started_at = Some(started_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FleetError::not_found("assignment", assignment_id)),
        }
    }

    async fn finish_assignment(&self, assignment_id: i64, outcome: &AssignmentOutcome) -> Result<bool> {
        let mut assignments = self.assignments.lock();
        let assignment = assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| FleetError::not_found("assignment", assignment_id))?;
        Ok(assignment.apply_outcome(outcome))
    }

    async fn find_active_assignment(&self, job_id: i64) -> Result<Option<Assignment>> {
        Ok(self
            .assignments
            .lock()
            .values()
            .find(|a| a.job_id == job_id && a.status.is_active())
            .cloned())
    }

    async fn list_assignments_for_job(&self, job_id: i64) -> Result<Vec<Assignment>> {
        Ok(self
            .assignments
            .lock()
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }
}
