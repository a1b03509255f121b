//! Fixtures for jobs, workers, and a wired-up scheduler.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use slicer_fleet::config::FleetConfig;
use slicer_fleet::fleet::WorkerRegistry;
use slicer_fleet::models::{NewSlicingJob, NewWorkerContainer, SlicingJob, WorkerContainer, WorkerStatus};
use slicer_fleet::orchestration::QueueScheduler;
use slicer_fleet::store::{InMemoryStore, SchedulerStore};

use super::fake_worker::{FakeWorkerClient, SliceBehavior};

pub fn test_config(max_concurrent_jobs: u32) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.scheduler.max_concurrent_jobs = max_concurrent_jobs;
    config
}

pub fn healthy_worker(name: &str, priority: i32, capacity: i32) -> NewWorkerContainer {
    NewWorkerContainer::new(name, "127.0.0.1", 9100)
        .with_priority(priority)
        .with_capacity(capacity)
        .with_status(WorkerStatus::Healthy)
}

pub fn job(priority: i32, created_at: DateTime<Utc>) -> NewSlicingJob {
    NewSlicingJob::new("models/benchy.stl", "profiles/pla-0.2mm")
        .with_user(42)
        .with_priority(priority)
        .created_at(created_at)
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

/// Store, registry, fake client, and scheduler sharing one in-memory fleet
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<WorkerRegistry>,
    pub client: Arc<FakeWorkerClient>,
    pub scheduler: QueueScheduler,
}

impl Harness {
    pub fn new(config: FleetConfig) -> Self {
        Self::with_client(config, FakeWorkerClient::new(SliceBehavior::Succeed))
    }

    pub fn with_client(config: FleetConfig, client: FakeWorkerClient) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(WorkerRegistry::new(store.clone()));
        let client = Arc::new(client);
        let scheduler = QueueScheduler::new(&config, store.clone(), registry.clone(), client.clone());
        Self {
            store,
            registry,
            client,
            scheduler,
        }
    }

    /// Register a worker in the store and refresh the registry cache
    pub async fn add_worker(&self, worker: NewWorkerContainer) -> WorkerContainer {
        let created = self.store.insert_worker(worker).await.unwrap();
        self.registry.load_all().await.unwrap();
        created
    }

    pub async fn add_job(&self, job: NewSlicingJob) -> SlicingJob {
        self.store.insert_job(job).await.unwrap()
    }

    pub async fn job(&self, job_id: i64) -> SlicingJob {
        self.store.find_job(job_id).await.unwrap().unwrap()
    }

    pub async fn worker(&self, worker_id: i64) -> WorkerContainer {
        self.store.find_worker(worker_id).await.unwrap().unwrap()
    }

    pub async fn drain(&self) {
        assert!(
            self.scheduler.drain(std::time::Duration::from_secs(5)).await,
            "in-flight jobs did not finish"
        );
    }
}
