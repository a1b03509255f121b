use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Assignment status. ASSIGNED and RUNNING are the only non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid assignment status: {s}")),
        }
    }
}

/// One execution attempt binding a job to a worker container.
/// Maps to `job_assignments` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: i64,
    pub job_id: i64,
    pub worker_id: i64,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
    /// Copied from the job at assignment time
    pub priority: i32,
    pub queue_wait_seconds: i64,
    pub execution_seconds: Option<i64>,
    /// Number of earlier attempts for the same job
    pub retry_count: i32,
    pub last_error_message: Option<String>,
    pub result_size_bytes: Option<i64>,
    pub result_line_count: Option<i64>,
}

/// New assignment for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
    pub job_id: i64,
    pub worker_id: i64,
    pub assigned_at: DateTime<Utc>,
    pub priority: i32,
    pub queue_wait_seconds: i64,
    pub retry_count: i32,
}

/// Terminal outcome written onto an assignment exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentOutcome {
    pub status: AssignmentStatus,
    pub completed_at: DateTime<Utc>,
    pub execution_seconds: Option<i64>,
    pub error_message: Option<String>,
    pub result_size_bytes: Option<i64>,
    pub result_line_count: Option<i64>,
}

impl AssignmentOutcome {
    pub fn completed(completed_at: DateTime<Utc>, size_bytes: Option<i64>, line_count: Option<i64>) -> Self {
        Self {
            status: AssignmentStatus::Completed,
            completed_at,
            execution_seconds: None,
            error_message: None,
            result_size_bytes: size_bytes,
            result_line_count: line_count,
        }
    }

    pub fn failed(completed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: AssignmentStatus::Failed,
            completed_at,
            execution_seconds: None,
            error_message: Some(error.into()),
            result_size_bytes: None,
            result_line_count: None,
        }
    }

    pub fn cancelled(completed_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            status: AssignmentStatus::Cancelled,
            error_message: Some(reason.into()),
            ..Self::failed(completed_at, "")
        }
    }

    /// Fill `execution_seconds` from the assignment's start time
    pub fn timed_from(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.execution_seconds =
            started_at.map(|started| (self.completed_at - started).num_seconds().max(0));
        self
    }
}

impl Assignment {
    /// Apply a terminal outcome in place; no-op once terminal
    pub fn apply_outcome(&mut self, outcome: &AssignmentOutcome) -> bool {
        if self.status.is_terminal() || !outcome.status.is_terminal() {
            return false;
        }
        self.status = outcome.status;
        self.completed_at = Some(outcome.completed_at);
        self.execution_seconds = outcome.execution_seconds;
        self.last_error_message = outcome.error_message.clone();
        self.result_size_bytes = outcome.result_size_bytes;
        self.result_line_count = outcome.result_line_count;
        true
    }
}
