//! # Queue Scheduler
//!
//! Moves QUEUED jobs onto workers and records how each attempt ends.
//!
//! ## Tick
//!
//! 1. Skip if disabled or if the previous tick is still running.
//! 2. Count PROCESSING jobs; stop if the global ceiling is reached.
//! 3. Fetch QUEUED jobs (priority desc, oldest first) and take at most the
//!    remaining slots.
//! 4. Dispatch each job: claim it in the in-flight set, pick a worker with the
//!    [`LoadBalancer`], claim a worker slot, open an assignment, mark the job
//!    PROCESSING, then run the slice call on its own task.
//!
//! ## Ownership of a dispatched job
//!
//! The in-flight entry decides who finishes a job. The completion path marks
//! the entry as finishing before it writes anything; the stale sweep only
//! takes entries that are not finishing. Whoever holds the entry releases the
//! worker slot, so a slot is given back exactly once. A stale takeover also
//! aborts the slice task, which returns its execution permit.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, instrument, warn};

use super::assignment_tracker::AssignmentTracker;
use super::health::SchedulerHealth;
use crate::config::{FleetConfig, SchedulerConfig};
use crate::constants::{SLICE_FAILED_ERROR, SLICE_TIMEOUT_ERROR, STALE_JOB_ERROR};
use crate::error::{FleetError, Result, WorkerCallError};
use crate::fleet::{WorkerClient, WorkerRegistry};
use crate::logging::log_job_operation;
use crate::models::{Assignment, JobStatus, SliceRequest, SliceResponse, SlicingJob, WorkerContainer};
use crate::services::LoadBalancer;
use crate::store::SchedulerStore;

/// What happened to one job during dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    Dispatched { worker_id: i64, assignment_id: i64 },
    /// Stays QUEUED for the next tick
    NoWorkerAvailable,
    AlreadyInFlight,
    /// Every execution permit is taken
    AtCapacity,
    /// The job changed underneath the dispatch
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickSummary {
    pub fetched: usize,
    pub dispatched: usize,
    pub no_worker: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    Disabled,
    /// The previous tick had not finished
    Overlapping,
    AtCeiling { processing: i64 },
    Ran(TickSummary),
}

#[derive(Debug, Clone)]
struct InFlightJob {
    worker_id: Option<i64>,
    claimed_at: DateTime<Utc>,
    finishing: bool,
    /// Slice task, set once the job is placed
    task: Option<AbortHandle>,
}

enum Placement {
    Placed(WorkerContainer, Assignment),
    NotPlaced(DispatchOutcome),
}

#[derive(Debug)]
struct SchedulerState {
    enabled: AtomicBool,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    started_at: DateTime<Utc>,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    last_progress_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Clone)]
pub struct QueueScheduler {
    config: SchedulerConfig,
    slice_timeout: Duration,
    store: Arc<dyn SchedulerStore>,
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
    balancer: LoadBalancer,
    tracker: AssignmentTracker,
    in_flight: Arc<DashMap<i64, InFlightJob>>,
    permits: Arc<Semaphore>,
    tick_guard: Arc<AsyncMutex<()>>,
    state: Arc<SchedulerState>,
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("enabled", &self.is_enabled())
            .field("max_concurrent_jobs", &self.config.max_concurrent_jobs)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl QueueScheduler {
    pub fn new(
        config: &FleetConfig,
        store: Arc<dyn SchedulerStore>,
        registry: Arc<WorkerRegistry>,
        client: Arc<dyn WorkerClient>,
    ) -> Self {
        let scheduler = config.scheduler.clone();
        Self {
            slice_timeout: config.worker_client.slice_timeout(),
            balancer: LoadBalancer::new(&config.load_balancer),
            tracker: AssignmentTracker::new(store.clone()),
            permits: Arc::new(Semaphore::new(scheduler.max_concurrent_jobs as usize)),
            state: Arc::new(SchedulerState {
                enabled: AtomicBool::new(scheduler.enabled),
                jobs_processed: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
                started_at: Utc::now(),
                last_tick_at: Mutex::new(None),
                last_progress_at: Mutex::new(None),
            }),
            in_flight: Arc::new(DashMap::new()),
            tick_guard: Arc::new(AsyncMutex::new(())),
            config: scheduler,
            store,
            registry,
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    /// Pause or resume dispatch; in-flight jobs are unaffected
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.state.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled = enabled, "Scheduler dispatch toggled");
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, job_id: i64) -> bool {
        self.in_flight.contains_key(&job_id)
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// One pass of the dispatch loop
    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        if !self.is_enabled() {
            return Ok(TickOutcome::Disabled);
        }
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Previous tick still running, skipping");
            return Ok(TickOutcome::Overlapping);
        };
        *self.state.last_tick_at.lock() = Some(Utc::now());

        let ceiling = i64::from(self.config.max_concurrent_jobs);
        let processing = self.store.count_jobs_by_status(JobStatus::Processing).await?;
        if processing >= ceiling {
            debug!(processing = processing, ceiling = ceiling, "Concurrency ceiling reached");
            return Ok(TickOutcome::AtCeiling { processing });
        }

        let available_slots = usize::try_from(ceiling - processing).unwrap_or(0);
        let batch = self.store.fetch_queued_jobs(self.config.batch_size).await?;
        let mut summary = TickSummary {
            fetched: batch.len(),
            ..Default::default()
        };

        for job in batch.into_iter().take(available_slots) {
            let job_id = job.id;
            match self.dispatch(job).await {
                Ok(DispatchOutcome::Dispatched { .. }) => summary.dispatched += 1,
                Ok(DispatchOutcome::NoWorkerAvailable) => summary.no_worker += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    self.state.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    error!(job_id = job_id, error = %e, "Dispatch failed");
                }
            }
        }

        if summary.fetched > 0 {
            info!(
                fetched = summary.fetched,
                dispatched = summary.dispatched,
                no_worker = summary.no_worker,
                skipped = summary.skipped,
                errors = summary.errors,
                "Scheduler tick complete"
            );
        }
        Ok(TickOutcome::Ran(summary))
    }

    /// Dispatch one job. The slice call runs on its own task; this returns
    /// once the job is PROCESSING on a worker, or left QUEUED.
    pub async fn dispatch(&self, job: SlicingJob) -> Result<DispatchOutcome> {
        match self.in_flight.entry(job.id) {
            Entry::Occupied(_) => {
                debug!(job_id = job.id, "Job already in flight");
                return Ok(DispatchOutcome::AlreadyInFlight);
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlightJob {
                    worker_id: None,
                    claimed_at: Utc::now(),
                    finishing: false,
                    task: None,
                });
            }
        }

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            self.in_flight.remove(&job.id);
            return Ok(DispatchOutcome::AtCapacity);
        };

        match self.place(&job).await {
            Ok(Placement::Placed(worker, assignment)) => {
                let job_id = job.id;
                if let Some(mut entry) = self.in_flight.get_mut(&job_id) {
                    entry.worker_id = Some(worker.id);
                }
                let outcome = DispatchOutcome::Dispatched {
                    worker_id: worker.id,
                    assignment_id: assignment.id,
                };
                let scheduler = self.clone();
                let handle = tokio::spawn(async move {
                    scheduler.execute(job, worker, assignment, permit).await;
                });
                // Absent when the slice call already finished
                if let Some(mut entry) = self.in_flight.get_mut(&job_id) {
                    entry.task = Some(handle.abort_handle());
                }
                Ok(outcome)
            }
            Ok(Placement::NotPlaced(outcome)) => {
                self.in_flight.remove(&job.id);
                Ok(outcome)
            }
            Err(e) => {
                self.in_flight.remove(&job.id);
                Err(e)
            }
        }
    }

    async fn place(&self, job: &SlicingJob) -> Result<Placement> {
        let mut candidates = self.registry.healthy_available_workers();
        let worker = loop {
            let Some(worker) = self.balancer.select(job, &candidates) else {
                debug!(job_id = job.id, "No worker available, job stays queued");
                return Ok(Placement::NotPlaced(DispatchOutcome::NoWorkerAvailable));
            };
            if self.registry.try_claim_slot(worker.id).await? {
                break worker;
            }
            debug!(job_id = job.id, worker_id = worker.id, "Worker filled up before claim, reselecting");
            candidates.retain(|c| c.id != worker.id);
        };

        let now = Utc::now();
        let assignment = match self.tracker.open(job, worker.id, now).await {
            Ok(assignment) => assignment,
            Err(e) => {
                self.release_slot(worker.id).await;
                return match e {
                    FleetError::InvalidState(reason) => {
                        warn!(job_id = job.id, reason = %reason, "Job already assigned, skipping");
                        Ok(Placement::NotPlaced(DispatchOutcome::Skipped))
                    }
                    other => Err(other),
                };
            }
        };

        let marked = match self.store.mark_job_processing(job.id, now).await {
            Ok(marked) => marked,
            Err(e) => {
                self.abandon(&assignment, "failed to mark job processing").await;
                return Err(e);
            }
        };
        if !marked {
            warn!(job_id = job.id, assignment_id = assignment.id, "Job no longer queued, cancelling assignment");
            self.abandon(&assignment, "job no longer queued").await;
            return Ok(Placement::NotPlaced(DispatchOutcome::Skipped));
        }

        if let Err(e) = self.registry.record_job_started(worker.id, now).await {
            warn!(worker_id = worker.id, error = %e, "Failed to record job start on worker");
        }
        *self.state.last_progress_at.lock() = Some(now);
        log_job_operation("dispatch", job.id, Some(worker.id), JobStatus::Processing.as_str(), None);

        Ok(Placement::Placed(worker, assignment))
    }

    async fn abandon(&self, assignment: &Assignment, reason: &str) {
        if let Err(e) = self.tracker.cancel(assignment, reason, Utc::now()).await {
            error!(assignment_id = assignment.id, error = %e, "Failed to cancel assignment");
        }
        self.release_slot(assignment.worker_id).await;
    }

    async fn release_slot(&self, worker_id: i64) {
        if let Err(e) = self.registry.release_slot(worker_id).await {
            error!(worker_id = worker_id, error = %e, "Failed to release worker slot");
        }
    }

    async fn execute(
        self,
        job: SlicingJob,
        worker: WorkerContainer,
        mut assignment: Assignment,
        permit: OwnedSemaphorePermit,
    ) {
        let _permit = permit;

        if let Err(e) = self.tracker.mark_running(&mut assignment, Utc::now()).await {
            warn!(assignment_id = assignment.id, error = %e, "Failed to mark assignment running");
        }

        let request = SliceRequest::from(&job);
        let result = match tokio::time::timeout(self.slice_timeout, self.client.slice(&worker, &request)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerCallError::Timeout),
        };

        self.finish(job.id, worker.id, &assignment, result).await;
    }

    async fn finish(
        &self,
        job_id: i64,
        worker_id: i64,
        assignment: &Assignment,
        result: std::result::Result<SliceResponse, WorkerCallError>,
    ) {
        let owned = match self.in_flight.get_mut(&job_id) {
            Some(mut entry) => {
                entry.finishing = true;
                true
            }
            None => false,
        };
        if !owned {
            warn!(job_id = job_id, worker_id = worker_id, "Job already recovered as stale, dropping late result");
            return;
        }

        let now = Utc::now();
        let outcome = match result {
            Ok(response) if response.success => Ok(response),
            Ok(response) => Err(response
                .error
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| SLICE_FAILED_ERROR.to_string())),
            Err(WorkerCallError::Timeout) => Err(SLICE_TIMEOUT_ERROR.to_string()),
            Err(WorkerCallError::Http { message, .. }) if !message.is_empty() => Err(message),
            Err(other) => Err(other.to_string()),
        };
        let success = outcome.is_ok();

        match &outcome {
            Ok(response) => {
                if let Err(e) = self.tracker.complete(assignment, response, now).await {
                    error!(assignment_id = assignment.id, error = %e, "Failed to close assignment");
                }
                match self
                    .store
                    .complete_job(job_id, now, response.output_reference.clone())
                    .await
                {
                    Ok(true) => log_job_operation("complete", job_id, Some(worker_id), JobStatus::Completed.as_str(), None),
                    Ok(false) => warn!(job_id = job_id, "Job was not PROCESSING, completion not recorded"),
                    Err(e) => error!(job_id = job_id, error = %e, "Failed to mark job completed"),
                }
            }
            Err(message) => {
                if let Err(e) = self.tracker.fail(assignment, message, now).await {
                    error!(assignment_id = assignment.id, error = %e, "Failed to close assignment");
                }
                match self.store.fail_job(job_id, message, now).await {
                    Ok(true) => log_job_operation("fail", job_id, Some(worker_id), JobStatus::Failed.as_str(), Some(message.as_str())),
                    Ok(false) => warn!(job_id = job_id, "Job was not PROCESSING, failure not recorded"),
                    Err(e) => error!(job_id = job_id, error = %e, "Failed to mark job failed"),
                }
            }
        }

        self.release_slot(worker_id).await;
        if let Err(e) = self.registry.record_job_outcome(worker_id, success, now).await {
            warn!(worker_id = worker_id, error = %e, "Failed to record job outcome on worker");
        }

        self.state.jobs_processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.state.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.state.last_progress_at.lock() = Some(now);
        self.in_flight.remove(&job_id);
    }

    /// Fail every job stuck in PROCESSING past the staleness threshold
    #[instrument(skip(self))]
    pub async fn sweep_stale_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(self.config.stale_job_threshold()) else {
            debug!("Stale threshold reaches past the earliest timestamp, nothing can be stale");
            return Ok(0);
        };
        let stale = self.store.find_stale_jobs(cutoff).await?;

        let mut recovered = 0;
        for job in stale {
            match self.recover_stale_job(&job, now).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = job.id, error = %e, "Failed to recover stale job"),
            }
        }

        if recovered > 0 {
            info!(recovered = recovered, "Recovered stale jobs");
        }
        Ok(recovered)
    }

    async fn recover_stale_job(&self, job: &SlicingJob, now: DateTime<Utc>) -> Result<bool> {
        let entry = self
            .in_flight
            .remove_if(&job.id, |_, entry| !entry.finishing)
            .map(|(_, entry)| entry);
        if entry.is_none() && self.in_flight.contains_key(&job.id) {
            debug!(job_id = job.id, "Job is finishing, leaving it to the completion path");
            return Ok(false);
        }

        let failed = match self.store.fail_job(job.id, STALE_JOB_ERROR, now).await {
            Ok(failed) => failed,
            Err(e) => {
                if let Some(entry) = entry {
                    self.in_flight.insert(job.id, entry);
                }
                return Err(e);
            }
        };
        if !failed && entry.is_none() {
            return Ok(false);
        }

        // Dropping the slice task returns its execution permit
        if let Some(task) = entry.as_ref().and_then(|e| e.task.as_ref()) {
            task.abort();
        }

        let assignment = self
            .tracker
            .fail_active_for_job(job.id, STALE_JOB_ERROR, now)
            .await?;
        let worker_id = entry
            .as_ref()
            .and_then(|e| e.worker_id)
            .or_else(|| assignment.as_ref().map(|a| a.worker_id));

        if let Some(worker_id) = worker_id {
            self.release_slot(worker_id).await;
            if let Err(e) = self.registry.record_job_outcome(worker_id, false, now).await {
                warn!(worker_id = worker_id, error = %e, "Failed to record stale job on worker");
            }
        }

        if let Some(entry) = entry {
            debug!(
                job_id = job.id,
                in_flight_seconds = (now - entry.claimed_at).num_seconds(),
                "Took over in-flight job"
            );
        }
        self.state.jobs_failed.fetch_add(1, Ordering::Relaxed);
        log_job_operation("stale_recovery", job.id, worker_id, JobStatus::Failed.as_str(), Some(STALE_JOB_ERROR));
        Ok(failed)
    }

    pub async fn health(&self) -> Result<SchedulerHealth> {
        let queued_jobs = self.store.count_jobs_by_status(JobStatus::Queued).await?;
        let last_progress_at = *self.state.last_progress_at.lock();
        let last_tick_at = *self.state.last_tick_at.lock();

        Ok(SchedulerHealth {
            enabled: self.is_enabled(),
            in_flight_jobs: self.in_flight.len(),
            jobs_processed: self.state.jobs_processed.load(Ordering::Relaxed),
            jobs_failed: self.state.jobs_failed.load(Ordering::Relaxed),
            queued_jobs,
            last_tick_at,
            last_progress_at,
            degraded: SchedulerHealth::is_degraded(
                queued_jobs,
                last_progress_at,
                self.state.started_at,
                Utc::now(),
                self.config.degraded_after(),
            ),
        })
    }

    /// Wait for every running slice call to return; false on timeout
    pub async fn drain(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(self.config.max_concurrent_jobs)).await,
            Ok(Ok(_))
        )
    }
}
