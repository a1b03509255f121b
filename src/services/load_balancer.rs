//! # Load Balancer
//!
//! Chooses one worker for one job. Selection is a pure function of the job
//! and the candidate list: nothing here touches the registry or the store,
//! so the caller decides what to do with the answer.
//!
//! Candidates are narrowed by best-effort filters (each one falls back to its
//! input when it would leave nobody), then scored:
//!
//! ```text
//! score = priority * 10 + load_percentage + (100 - success_rate) * 0.5
//! ```
//!
//! The lowest score wins; ties go to the earliest candidate.

use tracing::debug;

use crate::config::LoadBalancerConfig;
use crate::models::{SlicingJob, WorkerContainer};

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    large_job_threshold_bytes: i64,
    small_job_threshold_bytes: i64,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(&LoadBalancerConfig::default())
    }
}

impl LoadBalancer {
    pub fn new(config: &LoadBalancerConfig) -> Self {
        Self {
            large_job_threshold_bytes: config.large_job_threshold_bytes,
            small_job_threshold_bytes: config.small_job_threshold_bytes,
        }
    }

    /// Best worker for `job`, or `None` when there are no candidates
    pub fn select(&self, job: &SlicingJob, candidates: &[WorkerContainer]) -> Option<WorkerContainer> {
        if candidates.is_empty() {
            return None;
        }

        let filtered = self.filter(job, candidates);

        let mut best: Option<(&WorkerContainer, f64)> = None;
        for worker in filtered {
            let score = Self::score(worker);
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((worker, score)),
            }
        }

        best.map(|(worker, score)| {
            debug!(
                job_id = job.id,
                worker_id = worker.id,
                score = score,
                "Selected worker for job"
            );
            worker.clone()
        })
    }

    /// Lower is better
    pub fn score(worker: &WorkerContainer) -> f64 {
        f64::from(worker.priority) * 10.0
            + worker.load_percentage()
            + (100.0 - worker.success_rate()) * 0.5
    }

    fn filter<'a>(&self, job: &SlicingJob, candidates: &'a [WorkerContainer]) -> Vec<&'a WorkerContainer> {
        let mut pool: Vec<&WorkerContainer> = candidates.iter().collect();

        if job.requires_priority {
            pool = prefer(pool, |w| w.worker_type.supports_priority());
        }

        if let Some(size) = job.model_size_bytes {
            if size > self.large_job_threshold_bytes {
                pool = prefer(pool, |w| !w.worker_type.is_batch());
            } else if size < self.small_job_threshold_bytes {
                pool = prefer(pool, |w| w.worker_type.is_batch());
            }
        }

        pool
    }
}

/// Keep the workers matching `predicate`, or everyone if none match
fn prefer<'a, F>(pool: Vec<&'a WorkerContainer>, predicate: F) -> Vec<&'a WorkerContainer>
where
    F: Fn(&WorkerContainer) -> bool,
{
    let matching: Vec<&WorkerContainer> = pool.iter().copied().filter(|w| predicate(w)).collect();
    if matching.is_empty() {
        pool
    } else {
        matching
    }
}
