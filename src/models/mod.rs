//! # Models
//!
//! Records the scheduler reads and writes: jobs, worker containers, and the
//! assignments binding one to the other, plus the worker wire types.

pub mod assignment;
pub mod job;
pub mod slicing;
pub mod worker_container;

pub use assignment::{Assignment, AssignmentOutcome, AssignmentStatus, NewAssignment};
pub use job::{JobStatus, NewSlicingJob, SlicingJob};
pub use slicing::{SliceRequest, SliceResponse, WorkerErrorBody, WorkerHealthReport};
pub use worker_container::{NewWorkerContainer, WorkerContainer, WorkerStatus, WorkerType};
