//! Scripted [`WorkerClient`] for scheduler and prober tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use slicer_fleet::error::WorkerCallError;
use slicer_fleet::fleet::WorkerClient;
use slicer_fleet::models::{SliceRequest, SliceResponse, WorkerContainer, WorkerHealthReport};

#[derive(Debug, Clone)]
pub enum SliceBehavior {
    Succeed,
    /// 2xx with `success = false`
    Reject(String),
    HttpError(u16, String),
    /// Never answers
    Hang,
    /// Wait for a gate permit, then behave as the inner behavior
    Gated(Arc<Semaphore>, Box<SliceBehavior>),
}

impl SliceBehavior {
    pub fn gated(gate: &Arc<Semaphore>, then: SliceBehavior) -> Self {
        Self::Gated(gate.clone(), Box::new(then))
    }
}

#[derive(Debug, Clone)]
pub enum HealthBehavior {
    Healthy,
    HttpStatus(u16),
    Unreachable,
    Malformed,
}

#[derive(Debug)]
pub struct FakeWorkerClient {
    default_slice: Mutex<SliceBehavior>,
    slice_by_worker: Mutex<HashMap<i64, SliceBehavior>>,
    health_by_worker: Mutex<HashMap<i64, HealthBehavior>>,
    slice_calls: Mutex<Vec<(i64, i64)>>,
    health_calls: AtomicUsize,
}

impl Default for FakeWorkerClient {
    fn default() -> Self {
        Self::new(SliceBehavior::Succeed)
    }
}

impl FakeWorkerClient {
    pub fn new(default_slice: SliceBehavior) -> Self {
        Self {
            default_slice: Mutex::new(default_slice),
            slice_by_worker: Mutex::new(HashMap::new()),
            health_by_worker: Mutex::new(HashMap::new()),
            slice_calls: Mutex::new(Vec::new()),
            health_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_default_slice(&self, behavior: SliceBehavior) {
        *self.default_slice.lock() = behavior;
    }

    pub fn set_slice(&self, worker_id: i64, behavior: SliceBehavior) {
        self.slice_by_worker.lock().insert(worker_id, behavior);
    }

    pub fn set_health(&self, worker_id: i64, behavior: HealthBehavior) {
        self.health_by_worker.lock().insert(worker_id, behavior);
    }

    /// `(worker_id, job_id)` per slice call, in call order
    pub fn slice_calls(&self) -> Vec<(i64, i64)> {
        self.slice_calls.lock().clone()
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn slice_behavior(&self, worker_id: i64) -> SliceBehavior {
        self.slice_by_worker
            .lock()
            .get(&worker_id)
            .cloned()
            .unwrap_or_else(|| self.default_slice.lock().clone())
    }

    async fn run_slice(behavior: SliceBehavior, request: &SliceRequest) -> Result<SliceResponse, WorkerCallError> {
        let mut behavior = behavior;
        loop {
            match behavior {
                SliceBehavior::Succeed => {
                    return Ok(SliceResponse::succeeded(
                        format!("gcode/{}.gcode", request.job_id),
                        1_500,
                        64_000,
                    ))
                }
                SliceBehavior::Reject(error) => return Ok(SliceResponse::rejected(error)),
                SliceBehavior::HttpError(status, message) => {
                    return Err(WorkerCallError::http(status, message))
                }
                SliceBehavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                SliceBehavior::Gated(gate, then) => {
                    gate.acquire().await.expect("gate closed").forget();
                    behavior = *then;
                }
            }
        }
    }
}

#[async_trait]
impl WorkerClient for FakeWorkerClient {
    async fn health(&self, worker: &WorkerContainer) -> Result<WorkerHealthReport, WorkerCallError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .health_by_worker
            .lock()
            .get(&worker.id)
            .cloned()
            .unwrap_or(HealthBehavior::Healthy);

        match behavior {
            HealthBehavior::Healthy => Ok(WorkerHealthReport {
                version: Some("5.1.4".to_string()),
                available_memory: Some(8 * 1024 * 1024 * 1024),
                active_jobs: Some(worker.current_active_jobs),
            }),
            HealthBehavior::HttpStatus(status) => Err(WorkerCallError::http(status, "unavailable")),
            HealthBehavior::Unreachable => Err(WorkerCallError::Connection("connection refused".to_string())),
            HealthBehavior::Malformed => Err(WorkerCallError::InvalidResponse("expected value at line 1".to_string())),
        }
    }

    async fn slice(
        &self,
        worker: &WorkerContainer,
        request: &SliceRequest,
    ) -> Result<SliceResponse, WorkerCallError> {
        self.slice_calls.lock().push((worker.id, request.job_id));
        let behavior = self.slice_behavior(worker.id);
        Self::run_slice(behavior, request).await
    }
}
