use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Read-only scheduler snapshot for monitoring endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerHealth {
    pub enabled: bool,
    pub in_flight_jobs: usize,
    /// Slice calls that ended, successfully or not
    pub jobs_processed: u64,
    /// Failed slice calls plus stale recoveries and dispatch errors. Not a
    /// subset of `jobs_processed`, so it can be the larger of the two.
    pub jobs_failed: u64,
    pub queued_jobs: i64,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Last dispatch or completion
    pub last_progress_at: Option<DateTime<Utc>>,
    pub degraded: bool,
}

impl SchedulerHealth {
    /// Queue non-empty and nothing dispatched or finished within `window`.
    /// With no progress yet, the scheduler's start time is the reference.
    pub fn is_degraded(
        queued_jobs: i64,
        last_progress_at: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        queued_jobs > 0 && now - last_progress_at.unwrap_or(started_at) > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_signal() {
        let now = Utc::now();
        let window = Duration::minutes(5);

        assert!(!SchedulerHealth::is_degraded(0, None, now - Duration::hours(1), now, window));
        assert!(SchedulerHealth::is_degraded(3, None, now - Duration::hours(1), now, window));
        assert!(!SchedulerHealth::is_degraded(3, None, now - Duration::minutes(1), now, window));
        assert!(!SchedulerHealth::is_degraded(
            3,
            Some(now - Duration::minutes(2)),
            now - Duration::hours(1),
            now,
            window
        ));
        assert!(SchedulerHealth::is_degraded(
            3,
            Some(now - Duration::minutes(6)),
            now - Duration::hours(1),
            now,
            window
        ));
    }
}
