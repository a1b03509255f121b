use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{WorkerContainer, WorkerStatus};

/// Fleet snapshot for operational endpoints
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FleetStatistics {
    pub total_workers: usize,
    pub healthy_workers: usize,
    /// Worker count per type tag
    pub by_type: BTreeMap<String, usize>,
    /// Sum of `max_concurrent_jobs` over healthy workers
    pub total_capacity: i64,
    pub total_active_jobs: i64,
    /// Mean load of healthy workers, 0 when none are healthy
    pub average_load_percentage: f64,
}

impl FleetStatistics {
    pub fn from_workers(workers: &[WorkerContainer]) -> Self {
        let mut stats = Self {
            total_workers: workers.len(),
            ..Default::default()
        };
        let mut load_sum = 0.0;

        for worker in workers {
            *stats.by_type.entry(worker.worker_type.to_string()).or_insert(0) += 1;
            stats.total_active_jobs += i64::from(worker.current_active_jobs);

            if worker.status == WorkerStatus::Healthy {
                stats.healthy_workers += 1;
                stats.total_capacity += i64::from(worker.max_concurrent_jobs);
                load_sum += worker.load_percentage();
            }
        }

        if stats.healthy_workers > 0 {
            stats.average_load_percentage = load_sum / stats.healthy_workers as f64;
        }
        stats
    }
}
