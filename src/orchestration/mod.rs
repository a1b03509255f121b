//! # Orchestration
//!
//! The scheduling side of the fleet: assignment bookkeeping, the queue
//! scheduler with its dispatch tick and stale-job sweep, and the orchestrator
//! that runs them on timers.

pub mod assignment_tracker;
pub mod bootstrap;
pub mod health;
pub mod queue_scheduler;

pub use assignment_tracker::AssignmentTracker;
pub use bootstrap::FleetOrchestrator;
pub use health::SchedulerHealth;
pub use queue_scheduler::{DispatchOutcome, QueueScheduler, TickOutcome, TickSummary};
