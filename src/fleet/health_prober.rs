//! # Health Prober
//!
//! Probes every worker the registry owns and classifies the result:
//!
//! | Probe result                     | Status      | Reason                |
//! |----------------------------------|-------------|-----------------------|
//! | 2xx with a well-formed body      | `Healthy`   | -                     |
//! | connect failure or timeout       | `Unhealthy` | `connection timeout`  |
//! | non-2xx response                 | `Unhealthy` | `HTTP <code>`         |
//! | anything else                    | `Unknown`   | error text            |
//!
//! A failing worker never aborts the cycle; its error is logged and the
//! remaining probes continue.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::client::WorkerClient;
use super::registry::WorkerRegistry;
use crate::constants::PROBE_CONNECTION_TIMEOUT;
use crate::error::WorkerCallError;
use crate::logging::log_worker_operation;
use crate::models::{WorkerContainer, WorkerHealthReport, WorkerStatus};
use crate::store::HealthUpdate;

/// Counts from one probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    /// Probes whose result could not be persisted
    pub errors: usize,
}

impl ProbeSummary {
    fn record(&mut self, status: WorkerStatus) {
        match status {
            WorkerStatus::Healthy => self.healthy += 1,
            WorkerStatus::Unhealthy => self.unhealthy += 1,
            _ => self.unknown += 1,
        }
    }
}

pub struct HealthProber {
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
    max_concurrent_probes: usize,
}

impl std::fmt::Debug for HealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProber")
            .field("max_concurrent_probes", &self.max_concurrent_probes)
            .finish()
    }
}

impl HealthProber {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        client: Arc<dyn WorkerClient>,
        max_concurrent_probes: usize,
    ) -> Self {
        Self {
            registry,
            client,
            max_concurrent_probes: max_concurrent_probes.max(1),
        }
    }

    /// Map one probe result onto the update to persist
    pub fn classify(result: Result<WorkerHealthReport, WorkerCallError>, checked_at: DateTime<Utc>) -> HealthUpdate {
        match result {
            Ok(report) => HealthUpdate::healthy(checked_at, report.version, report.available_memory),
            Err(WorkerCallError::Timeout) | Err(WorkerCallError::Connection(_)) => {
                HealthUpdate::degraded(WorkerStatus::Unhealthy, checked_at, PROBE_CONNECTION_TIMEOUT)
            }
            Err(WorkerCallError::Http { status, .. }) => {
                HealthUpdate::degraded(WorkerStatus::Unhealthy, checked_at, format!("HTTP {status}"))
            }
            Err(other) => HealthUpdate::degraded(WorkerStatus::Unknown, checked_at, other.to_string()),
        }
    }

    /// Probe every registered worker once
    #[instrument(skip(self))]
    pub async fn probe_all(&self) -> ProbeSummary {
        if let Err(e) = self.registry.refresh_from_store().await {
            warn!(error = %e, "Failed to refresh worker list, probing cached workers");
        }

        let targets = self.registry.probe_targets();
        let mut summary = ProbeSummary::default();
        if targets.is_empty() {
            debug!("No workers to probe");
            return summary;
        }

        let results: Vec<Option<WorkerStatus>> = stream::iter(targets)
            .map(|worker| async move { self.probe_worker(&worker).await })
            .buffer_unordered(self.max_concurrent_probes)
            .collect()
            .await;

        for result in results {
            summary.probed += 1;
            match result {
                Some(status) => summary.record(status),
                None => summary.errors += 1,
            }
        }

        info!(
            probed = summary.probed,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            unknown = summary.unknown,
            errors = summary.errors,
            "Health probe cycle complete"
        );
        summary
    }

    /// Probe one worker and persist the outcome.
    ///
    /// Returns the new status, or `None` if the result could not be written.
    pub async fn probe_worker(&self, worker: &WorkerContainer) -> Option<WorkerStatus> {
        let result = self.client.health(worker).await;
        if let Err(e) = &result {
            debug!(worker_id = worker.id, error = %e, "Health probe failed");
        }
        let update = Self::classify(result, Utc::now());

        match self.registry.apply_health(worker.id, &update).await {
            Ok(updated) => {
                if updated.status != worker.status {
                    log_worker_operation(
                        "health_status_change",
                        worker.id,
                        updated.status.as_str(),
                        update.reason.as_deref(),
                    );
                }
                Some(updated.status)
            }
            Err(e) => {
                error!(worker_id = worker.id, error = %e, "Failed to record health probe result");
                None
            }
        }
    }
}
