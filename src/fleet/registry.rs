//! # Worker Registry
//!
//! In-memory cache of the worker fleet, backed by the [`SchedulerStore`].
//!
//! The cache is the process-local authority for slot claims: a claim is a
//! check-and-increment under the worker's map entry, so two dispatch tasks
//! can never both take a worker's last slot. Every cache mutation is paired
//! with the matching store write.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::stats::FleetStatistics;
use crate::error::Result;
use crate::models::{NewWorkerContainer, WorkerContainer, WorkerStatus};
use crate::store::{HealthUpdate, SchedulerStore};

pub struct WorkerRegistry {
    store: Arc<dyn SchedulerStore>,
    workers: DashMap<i64, WorkerContainer>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("cached_workers", &self.workers.len())
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn SchedulerStore>) -> Self {
        Self {
            store,
            workers: DashMap::new(),
        }
    }

    /// Replace the cache with every persisted worker
    pub async fn load_all(&self) -> Result<usize> {
        let workers = self.store.list_workers().await?;
        self.replace(workers);
        info!(workers = self.workers.len(), "Loaded worker fleet from store");
        Ok(self.workers.len())
    }

    /// Replace the cache with the last-persisted HEALTHY set, without probing
    pub async fn load_healthy(&self) -> Result<usize> {
        let workers = self.store.list_workers_by_status(WorkerStatus::Healthy).await?;
        self.replace(workers);
        info!(workers = self.workers.len(), "Loaded cached healthy workers from store");
        Ok(self.workers.len())
    }

    fn replace(&self, workers: Vec<WorkerContainer>) {
        self.workers.clear();
        for worker in workers {
            self.workers.insert(worker.id, worker);
        }
    }

    /// Pick up workers registered or re-configured out-of-band.
    ///
    /// Cached activity counters are kept for workers already known, since the
    /// scheduler mutates them between store reads.
    pub async fn refresh_from_store(&self) -> Result<usize> {
        let workers = self.store.list_workers().await?;
        let mut added = 0;
        for mut worker in workers {
            match self.workers.get_mut(&worker.id) {
                Some(mut cached) => {
                    worker.current_active_jobs = cached.current_active_jobs;
                    worker.total_jobs_processed = cached.total_jobs_processed;
                    worker.total_jobs_failed = cached.total_jobs_failed;
                    worker.current_active_jobs = worker.clamp_active_jobs(worker.current_active_jobs);
                    *cached = worker;
                }
                None => {
                    debug!(worker_id = worker.id, name = %worker.name, "Discovered new worker");
                    self.workers.insert(worker.id, worker);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Administrative registration: persist and cache a new worker
    pub async fn register(&self, worker: NewWorkerContainer) -> Result<WorkerContainer> {
        let created = self.store.insert_worker(worker).await?;
        info!(worker_id = created.id, name = %created.name, worker_type = %created.worker_type, "Registered worker");
        self.workers.insert(created.id, created.clone());
        Ok(created)
    }

    pub fn get(&self, worker_id: i64) -> Option<WorkerContainer> {
        self.workers.get(&worker_id).map(|w| w.clone())
    }

    /// Every cached worker ordered by id
    pub fn workers(&self) -> Vec<WorkerContainer> {
        let mut workers: Vec<WorkerContainer> = self.workers.iter().map(|w| w.clone()).collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    /// Workers the health prober is responsible for
    pub fn probe_targets(&self) -> Vec<WorkerContainer> {
        self.workers()
            .into_iter()
            .filter(|w| w.status.is_probed())
            .collect()
    }

    /// HEALTHY workers below their concurrency cap, ordered by ascending
    /// priority value, then ascending current load, then id
    pub fn healthy_available_workers(&self) -> Vec<WorkerContainer> {
        let mut available: Vec<WorkerContainer> = self
            .workers
            .iter()
            .filter(|w| w.is_available())
            .map(|w| w.clone())
            .collect();
        available.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.load_percentage().total_cmp(&b.load_percentage()))
                .then_with(|| a.id.cmp(&b.id))
        });
        available
    }

    /// Write a probe result to the store, then mirror the stored row into the cache
    pub async fn apply_health(&self, worker_id: i64, update: &HealthUpdate) -> Result<WorkerContainer> {
        let stored = self.store.update_worker_health(worker_id, update).await?;
        let merged = match self.workers.get_mut(&worker_id) {
            Some(mut cached) => {
                update.apply_to(&mut cached);
                cached.clone()
            }
            None => {
                self.workers.insert(worker_id, stored.clone());
                stored
            }
        };
        Ok(merged)
    }

    /// Claim one execution slot on a worker.
    ///
    /// Returns `Ok(false)` if the worker is unknown, not HEALTHY, or already
    /// full; the caller leaves the job queued.
    pub async fn try_claim_slot(&self, worker_id: i64) -> Result<bool> {
        let claimed = match self.workers.get_mut(&worker_id) {
            Some(mut worker) if worker.is_available() => {
                worker.current_active_jobs += 1;
                true
            }
            _ => false,
        };
        if !claimed {
            return Ok(false);
        }

        if let Err(e) = self.store.adjust_active_jobs(worker_id, 1).await {
            self.decrement_cached(worker_id);
            return Err(e);
        }
        Ok(true)
    }

    /// Give back one slot; the count never drops below zero
    pub async fn release_slot(&self, worker_id: i64) -> Result<i32> {
        self.decrement_cached(worker_id);
        let remaining = self.store.adjust_active_jobs(worker_id, -1).await?;
        debug!(worker_id = worker_id, active_jobs = remaining, "Released worker slot");
        Ok(remaining)
    }

    fn decrement_cached(&self, worker_id: i64) {
        if let Some(mut worker) = self.workers.get_mut(&worker_id) {
            if worker.current_active_jobs <= 0 {
                warn!(worker_id = worker_id, "Active job count already at zero, clamping");
            }
            worker.current_active_jobs = worker.clamp_active_jobs(worker.current_active_jobs - 1);
        }
    }

    pub async fn record_job_started(&self, worker_id: i64, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut worker) = self.workers.get_mut(&worker_id) {
            worker.last_job_started = Some(at);
        }
        self.store.record_job_started(worker_id, at).await
    }

    pub async fn record_job_outcome(&self, worker_id: i64, success: bool, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut worker) = self.workers.get_mut(&worker_id) {
            worker.total_jobs_processed += 1;
            if !success {
                worker.total_jobs_failed += 1;
            }
            worker.last_job_completed = Some(at);
        }
        self.store.record_job_outcome(worker_id, success, at).await
    }

    pub fn fleet_statistics(&self) -> FleetStatistics {
        FleetStatistics::from_workers(&self.workers())
    }
}
