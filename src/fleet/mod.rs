//! # Worker Fleet
//!
//! Everything that knows about the remote slicing workers: the HTTP client,
//! the cached registry the load balancer reads, and the health prober that
//! keeps it current.

pub mod client;
pub mod health_prober;
pub mod registry;
pub mod stats;

pub use client::{HttpWorkerClient, WorkerClient};
pub use health_prober::{HealthProber, ProbeSummary};
pub use registry::WorkerRegistry;
pub use stats::FleetStatistics;
