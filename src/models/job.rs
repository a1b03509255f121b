use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Slicing job status. Transitions only move forward:
/// QUEUED -> PROCESSING -> {COMPLETED, FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the scheduler may move a job from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// A unit of slicing work.
/// Maps to `slicing_jobs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SlicingJob {
    pub id: i64,
    pub model_reference: String,
    pub slicing_property_reference: String,
    pub user_id: i64,
    /// Higher is more urgent
    pub priority: i32,
    /// Asks the load balancer to prefer priority workers
    pub requires_priority: bool,
    /// Size of the source model, when known
    pub model_size_bytes: Option<i64>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percentage: i32,
    pub error_message: Option<String>,
    /// Generated artifact reference reported by the worker
    pub output_reference: Option<String>,
}

/// New job for insertion (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlicingJob {
    pub model_reference: String,
    pub slicing_property_reference: String,
    pub user_id: i64,
    pub priority: i32,
    pub requires_priority: bool,
    pub model_size_bytes: Option<i64>,
    /// Defaults to now when absent
    pub created_at: Option<DateTime<Utc>>,
}

impl NewSlicingJob {
    pub fn new(model_reference: impl Into<String>, slicing_property_reference: impl Into<String>) -> Self {
        Self {
            model_reference: model_reference.into(),
            slicing_property_reference: slicing_property_reference.into(),
            user_id: 0,
            priority: 0,
            requires_priority: false,
            model_size_bytes: None,
            created_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_model_size(mut self, bytes: i64) -> Self {
        self.model_size_bytes = Some(bytes);
        self
    }

    pub fn requiring_priority(mut self) -> Self {
        self.requires_priority = true;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

impl SlicingJob {
    /// Seconds between submission and `at`, floored at zero
    pub fn seconds_waiting_at(&self, at: DateTime<Utc>) -> i64 {
        (at - self.created_at).num_seconds().max(0)
    }

    /// Whether a PROCESSING job started before `cutoff`
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.started_at.map(|started| started < cutoff).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(status: JobStatus, started_at: Option<DateTime<Utc>>) -> SlicingJob {
        SlicingJob {
            id: 1,
            model_reference: "models/benchy.stl".into(),
            slicing_property_reference: "profiles/pla-0.2".into(),
            user_id: 7,
            priority: 5,
            requires_priority: false,
            model_size_bytes: None,
            status,
            created_at: Utc::now() - Duration::hours(1),
            started_at,
            completed_at: None,
            progress_percentage: 0,
            error_message: None,
            output_reference: None,
        }
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(30);

        assert!(job(JobStatus::Processing, Some(now - Duration::minutes(40))).is_stale(cutoff));
        assert!(!job(JobStatus::Processing, Some(now - Duration::minutes(10))).is_stale(cutoff));
        assert!(!job(JobStatus::Processing, None).is_stale(cutoff));
        assert!(!job(JobStatus::Completed, Some(now - Duration::hours(2))).is_stale(cutoff));
    }
}
