//! Wire types for the worker HTTP contract (`GET /health`, `POST /slice`).

use serde::{Deserialize, Serialize};

use super::job::SlicingJob;

/// Body of a healthy `GET /health` response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerHealthReport {
    pub version: Option<String>,
    pub available_memory: Option<i64>,
    pub active_jobs: Option<i32>,
}

/// Body of `POST /slice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRequest {
    pub job_id: i64,
    pub model_reference: String,
    pub slicing_property_reference: String,
    pub user_id: i64,
    pub priority: i32,
}

impl From<&SlicingJob> for SliceRequest {
    fn from(job: &SlicingJob) -> Self {
        Self {
            job_id: job.id,
            model_reference: job.model_reference.clone(),
            slicing_property_reference: job.slicing_property_reference.clone(),
            user_id: job.user_id,
            priority: job.priority,
        }
    }
}

/// Body of a `POST /slice` response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SliceResponse {
    pub success: bool,
    /// Reference to the generated G-code artifact
    pub output_reference: Option<String>,
    pub line_count: Option<i64>,
    pub size_bytes: Option<i64>,
    pub error: Option<String>,
}

impl SliceResponse {
    pub fn succeeded(output_reference: impl Into<String>, line_count: i64, size_bytes: i64) -> Self {
        Self {
            success: true,
            output_reference: Some(output_reference.into()),
            line_count: Some(line_count),
            size_bytes: Some(size_bytes),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Structured error body a worker may send with a non-2xx status
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerErrorBody {
    pub error: String,
}
