//! proptest strategies for fleet and job shapes.

use chrono::Utc;
use proptest::prelude::*;

use slicer_fleet::models::{JobStatus, SlicingJob, WorkerContainer, WorkerStatus, WorkerType};

pub fn worker_type_strategy() -> impl Strategy<Value = WorkerType> {
    prop_oneof![
        Just(WorkerType::Standard),
        Just(WorkerType::Priority),
        Just(WorkerType::Batch),
        "[a-z]{3,8}".prop_map(|tag: String| WorkerType::from(tag)),
    ]
}

prop_compose! {
    pub fn worker_strategy(id: i64)(
        worker_type in worker_type_strategy(),
        priority in 0i32..5,
        max in 1i32..8,
        active_ratio in 0.0f64..1.0,
        processed in 0i64..500,
        failed_ratio in 0.0f64..1.0,
    ) -> WorkerContainer {
        let active = ((max as f64) * active_ratio) as i32;
        let failed = ((processed as f64) * failed_ratio) as i64;
        WorkerContainer {
            id,
            external_id: format!("ext-{id}"),
            name: format!("slicer-{id}"),
            worker_type,
            host: "10.0.0.1".to_string(),
            port: 8080,
            status: WorkerStatus::Healthy,
            priority,
            max_concurrent_jobs: max,
            current_active_jobs: active.min(max - 1),
            total_jobs_processed: processed,
            total_jobs_failed: failed,
            last_health_check: None,
            last_job_started: None,
            last_job_completed: None,
            status_reason: None,
            slicer_version: None,
            available_memory_bytes: None,
        }
    }
}

pub fn candidates_strategy() -> impl Strategy<Value = Vec<WorkerContainer>> {
    (0usize..8).prop_flat_map(|count| {
        (0..count)
            .map(|i| worker_strategy(i as i64 + 1))
            .collect::<Vec<_>>()
    })
}

prop_compose! {
    pub fn job_strategy()(
        priority in -5i32..20,
        requires_priority in any::<bool>(),
        model_size_bytes in proptest::option::of(0i64..200 * 1024 * 1024),
    ) -> SlicingJob {
        SlicingJob {
            id: 1,
            model_reference: "models/part.stl".to_string(),
            slicing_property_reference: "profiles/default".to_string(),
            user_id: 1,
            priority,
            requires_priority,
            model_size_bytes,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress_percentage: 0,
            error_message: None,
            output_reference: None,
        }
    }
}
