//! # Error Types
//!
//! Structured errors for the slicing fleet core. Failures that belong to a
//! single job or a single worker are recorded on the job, assignment, or
//! worker row and logged; these types only surface to direct callers of the
//! library API (bootstrap, admin operations, tests).

use thiserror::Error;

use crate::config::ConfigurationError;

/// Failure of an outbound call to a slicing worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerCallError {
    /// The call did not finish within its configured timeout
    #[error("timeout")]
    Timeout,

    /// The worker could not be reached (refused, reset, DNS, ...)
    #[error("connection failed: {0}")]
    Connection(String),

    /// The worker answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The worker answered 2xx but the body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl WorkerCallError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Whether the failure means the worker was not reachable at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }
}

/// Top-level error for the scheduler, registry, and store layers.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Worker call failed: {0}")]
    WorkerCall(#[from] WorkerCallError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
