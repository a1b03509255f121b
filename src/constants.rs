//! # System Constants
//!
//! Fixed values shared by the scheduler, registry, and prober.

/// Error message recorded when the scheduler gives up on a job stuck in processing
pub const STALE_JOB_ERROR: &str = "Job timed out: no completion signal from worker";

/// Error message recorded when a slice call exceeds its timeout
pub const SLICE_TIMEOUT_ERROR: &str = "timeout";

/// Fallback error when a worker reports failure without a message
pub const SLICE_FAILED_ERROR: &str = "slicing failed";

/// Reason recorded when a worker cannot be reached during a health probe
pub const PROBE_CONNECTION_TIMEOUT: &str = "connection timeout";

/// Worker type tags with dispatch meaning
pub mod worker_types {
    pub const STANDARD: &str = "standard";
    pub const PRIORITY: &str = "priority";
    pub const BATCH: &str = "batch";
}

/// Worker endpoints
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const SLICE: &str = "/slice";
}

pub mod defaults {
    pub const POLL_INTERVAL_SECONDS: u64 = 15;
    pub const MAX_CONCURRENT_JOBS: u32 = 4;
    pub const BATCH_SIZE: u32 = 10;
    pub const STALE_CHECK_INTERVAL_SECONDS: u64 = 300;
    pub const STALE_JOB_THRESHOLD_MINUTES: u64 = 30;
    pub const DEGRADED_AFTER_SECONDS: u64 = 300;
    /// One week
    pub const MAX_STALE_JOB_THRESHOLD_MINUTES: u64 = 7 * 24 * 60;
    pub const MAX_DEGRADED_AFTER_SECONDS: u64 = 7 * 24 * 60 * 60;

    pub const HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;
    pub const HEALTH_CONNECT_TIMEOUT_MS: u64 = 2_000;
    pub const HEALTH_REQUEST_TIMEOUT_MS: u64 = 5_000;
    pub const MAX_CONCURRENT_PROBES: usize = 8;

    pub const LARGE_JOB_THRESHOLD_BYTES: i64 = 50 * 1024 * 1024;
    pub const SMALL_JOB_THRESHOLD_BYTES: i64 = 5 * 1024 * 1024;

    pub const SLICE_CONNECT_TIMEOUT_SECONDS: u64 = 10;
    pub const SLICE_TIMEOUT_SECONDS: u64 = 900;

    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;
    pub const DATABASE_ACQUIRE_TIMEOUT_SECONDS: u64 = 5;
}
