#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Slicer Fleet
//!
//! Job scheduling and worker-fleet orchestration for distributed 3D-model
//! slicing.
//!
//! ## Overview
//!
//! Slicing jobs are queued by an external submission surface. This crate
//! decides which remote slicing worker runs each job, enforces global and
//! per-worker concurrency limits, keeps the fleet's health current, and fails
//! jobs whose worker never answered.
//!
//! ## Module Organization
//!
//! - [`models`] - Jobs, worker containers, assignments, and worker wire types
//! - [`store`] - Persistence contract with in-memory and PostgreSQL backends
//! - [`fleet`] - Worker HTTP client, cached registry, and health prober
//! - [`services`] - Load balancer (pure worker selection)
//! - [`orchestration`] - Assignment tracking, queue scheduler, and the orchestrator loops
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slicer_fleet::config::ConfigManager;
//! use slicer_fleet::fleet::HttpWorkerClient;
//! use slicer_fleet::orchestration::FleetOrchestrator;
//! use slicer_fleet::store::PgStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//!
//! let store = PgStore::connect(&config.database).await?;
//! store.run_migrations().await?;
//! let client = HttpWorkerClient::new(&config.health, &config.worker_client)?;
//!
//! let orchestrator = FleetOrchestrator::new(config, Arc::new(store), Arc::new(client));
//! orchestrator.start().await?;
//! // ...
//! orchestrator.stop(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod services;
pub mod store;

pub use config::{ConfigManager, FleetConfig};
pub use error::{FleetError, Result, WorkerCallError};
pub use fleet::{FleetStatistics, HealthProber, HttpWorkerClient, WorkerClient, WorkerRegistry};
pub use models::{
    Assignment, AssignmentStatus, JobStatus, SlicingJob, WorkerContainer, WorkerStatus, WorkerType,
};
pub use orchestration::{FleetOrchestrator, QueueScheduler, SchedulerHealth};
pub use services::LoadBalancer;
pub use store::{InMemoryStore, PgStore, SchedulerStore};
