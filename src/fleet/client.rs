//! # Worker Client
//!
//! Outbound HTTP calls to slicing workers: `GET /health` for the prober and
//! `POST /slice` for dispatched jobs. Probe and slice calls use separate
//! reqwest clients because their timeouts differ by orders of magnitude.

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{HealthConfig, WorkerClientConfig};
use crate::constants::endpoints;
use crate::error::{FleetError, WorkerCallError};
use crate::models::{SliceRequest, SliceResponse, WorkerContainer, WorkerErrorBody, WorkerHealthReport};

/// The two calls the scheduler makes against a worker
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn health(&self, worker: &WorkerContainer) -> Result<WorkerHealthReport, WorkerCallError>;

    async fn slice(
        &self,
        worker: &WorkerContainer,
        request: &SliceRequest,
    ) -> Result<SliceResponse, WorkerCallError>;
}

/// reqwest-backed [`WorkerClient`]
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    probe_client: Client,
    slice_client: Client,
}

impl HttpWorkerClient {
    pub fn new(health: &HealthConfig, worker_client: &WorkerClientConfig) -> Result<Self, FleetError> {
        let probe_client = Self::build_client(health.connect_timeout(), health.request_timeout())?;
        let slice_client =
            Self::build_client(worker_client.connect_timeout(), worker_client.slice_timeout())?;

        info!(
            probe_timeout_ms = health.request_timeout_ms,
            slice_timeout_seconds = worker_client.slice_timeout_seconds,
            "Created HttpWorkerClient"
        );

        Ok(Self {
            probe_client,
            slice_client,
        })
    }

    fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client, FleetError> {
        Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(format!("slicer-scheduler/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FleetError::WorkerCall(WorkerCallError::Other(format!("Failed to create HTTP client: {e}"))))
    }

    /// Turn a non-2xx response into `WorkerCallError::Http`, preferring the
    /// worker's structured `error` field over the raw body
    async fn error_from_response(response: Response) -> WorkerCallError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WorkerErrorBody>(&body)
            .map(|parsed| parsed.error)
            .unwrap_or(body);
        WorkerCallError::http(status, message)
    }
}

fn map_transport_error(error: reqwest::Error) -> WorkerCallError {
    if error.is_timeout() {
        WorkerCallError::Timeout
    } else if error.is_connect() {
        WorkerCallError::Connection(error.to_string())
    } else if error.is_decode() {
        WorkerCallError::InvalidResponse(error.to_string())
    } else {
        WorkerCallError::Other(error.to_string())
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn health(&self, worker: &WorkerContainer) -> Result<WorkerHealthReport, WorkerCallError> {
        let url = format!("{}{}", worker.base_url(), endpoints::HEALTH);
        debug!(worker_id = worker.id, url = %url, "Probing worker health");

        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<WorkerHealthReport>()
            .await
            .map_err(|e| WorkerCallError::InvalidResponse(e.to_string()))
    }

    async fn slice(
        &self,
        worker: &WorkerContainer,
        request: &SliceRequest,
    ) -> Result<SliceResponse, WorkerCallError> {
        let url = format!("{}{}", worker.base_url(), endpoints::SLICE);
        debug!(worker_id = worker.id, job_id = request.job_id, url = %url, "Sending slice request");

        let response = self
            .slice_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let error = Self::error_from_response(response).await;
            warn!(worker_id = worker.id, job_id = request.job_id, error = %error, "Slice request rejected");
            return Err(error);
        }

        response.json::<SliceResponse>().await.map_err(|e| {
            if e.is_timeout() {
                WorkerCallError::Timeout
            } else {
                WorkerCallError::InvalidResponse(e.to_string())
            }
        })
    }
}
