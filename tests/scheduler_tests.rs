//! Queue scheduler behavior against the in-memory store and a scripted fleet.

mod common;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;

use common::*;
use slicer_fleet::models::{AssignmentStatus, JobStatus, NewAssignment};
use slicer_fleet::orchestration::{DispatchOutcome, TickOutcome};
use slicer_fleet::store::SchedulerStore;

fn ran(outcome: TickOutcome) -> slicer_fleet::orchestration::TickSummary {
    match outcome {
        TickOutcome::Ran(summary) => summary,
        other => panic!("expected tick to run, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tick_respects_global_ceiling() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(2),
        FakeWorkerClient::new(SliceBehavior::gated(&gate, SliceBehavior::Succeed)),
    );
    harness.add_worker(healthy_worker("slicer-a", 1, 5)).await;
    for minutes in [3, 2, 1] {
        harness.add_job(job(0, minutes_ago(minutes))).await;
    }

    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 2);

    assert_eq!(harness.store.count_jobs_by_status(JobStatus::Processing).await.unwrap(), 2);
    assert_eq!(harness.store.count_jobs_by_status(JobStatus::Queued).await.unwrap(), 1);
    assert_eq!(harness.store.all_assignments().len(), 2);

    // Ceiling reached: the next tick is a no-op
    assert_eq!(
        harness.scheduler.run_tick().await.unwrap(),
        TickOutcome::AtCeiling { processing: 2 }
    );

    gate.add_permits(2);
    harness.drain().await;
    assert_eq!(harness.store.count_jobs_by_status(JobStatus::Completed).await.unwrap(), 2);

    gate.add_permits(1);
    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 1);
    harness.drain().await;
    assert_eq!(harness.store.count_jobs_by_status(JobStatus::Completed).await.unwrap(), 3);
}

#[tokio::test]
async fn test_dispatch_order_is_priority_then_age() {
    let harness = Harness::new(test_config(3));
    harness.add_worker(healthy_worker("slicer-a", 1, 3)).await;

    let first = harness.add_job(job(5, minutes_ago(30))).await;
    let urgent = harness.add_job(job(10, minutes_ago(20))).await;
    let last = harness.add_job(job(5, minutes_ago(10))).await;

    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 3);
    harness.drain().await;

    let dispatched: Vec<i64> = harness
        .store
        .all_assignments()
        .into_iter()
        .map(|a| a.job_id)
        .collect();
    assert_eq!(dispatched, vec![urgent.id, first.id, last.id]);
}

#[tokio::test]
async fn test_no_workers_leaves_job_queued() {
    let harness = Harness::new(test_config(4));
    let queued = harness.add_job(job(1, Utc::now())).await;

    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.no_worker, 1);
    assert_eq!(summary.errors, 0);

    assert_eq!(harness.job(queued.id).await.status, JobStatus::Queued);
    assert!(harness.store.all_assignments().is_empty());
    assert_eq!(harness.scheduler.in_flight_count(), 0);
}

#[tokio::test]
async fn test_full_worker_is_never_selected() {
    let harness = Harness::new(test_config(4));
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 1)).await;
    assert!(harness.registry.try_claim_slot(worker.id).await.unwrap());

    let queued = harness.add_job(job(1, Utc::now())).await;
    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.no_worker, 1);
    assert_eq!(harness.job(queued.id).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_concurrent_dispatch_of_same_job_creates_one_assignment() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(4),
        FakeWorkerClient::new(SliceBehavior::gated(&gate, SliceBehavior::Succeed)),
    );
    harness.add_worker(healthy_worker("slicer-a", 1, 4)).await;
    let queued = harness.add_job(job(1, Utc::now())).await;

    let (a, b) = tokio::join!(
        harness.scheduler.dispatch(queued.clone()),
        harness.scheduler.dispatch(queued.clone())
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Dispatched { .. }));
    assert_eq!(outcomes[0], DispatchOutcome::AlreadyInFlight);
    assert!(matches!(outcomes[1], DispatchOutcome::Dispatched { .. }));

    assert_eq!(harness.store.all_assignments().len(), 1);
    assert!(harness.scheduler.is_in_flight(queued.id));

    gate.add_permits(1);
    harness.drain().await;
    assert_eq!(harness.job(queued.id).await.status, JobStatus::Completed);
    assert!(!harness.scheduler.is_in_flight(queued.id));
}

#[tokio::test]
async fn test_overlapping_ticks_dispatch_once() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(4),
        FakeWorkerClient::new(SliceBehavior::gated(&gate, SliceBehavior::Succeed)),
    );
    harness.add_worker(healthy_worker("slicer-a", 1, 4)).await;
    harness.add_job(job(1, Utc::now())).await;

    let (first, second) = tokio::join!(harness.scheduler.run_tick(), harness.scheduler.run_tick());
    first.unwrap();
    second.unwrap();

    assert_eq!(harness.store.all_assignments().len(), 1);

    gate.add_permits(1);
    harness.drain().await;
    assert_eq!(harness.client.slice_calls().len(), 1);
}

#[tokio::test]
async fn test_successful_slice_completes_job() {
    let harness = Harness::new(test_config(4));
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let queued = harness.add_job(job(1, minutes_ago(2))).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    harness.drain().await;

    let done = harness.job(queued.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress_percentage, 100);
    assert_eq!(done.output_reference.as_deref(), Some(format!("gcode/{}.gcode", queued.id).as_str()));
    assert!(done.completed_at.is_some());

    let assignments = harness.store.list_assignments_for_job(queued.id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].status, AssignmentStatus::Completed);
    assert_eq!(assignments[0].worker_id, worker.id);
    assert_eq!(assignments[0].result_line_count, Some(1_500));
    assert!(assignments[0].queue_wait_seconds >= 119);

    let after = harness.worker(worker.id).await;
    assert_eq!(after.current_active_jobs, 0);
    assert_eq!(after.total_jobs_processed, 1);
    assert_eq!(after.total_jobs_failed, 0);
    assert!(after.last_job_started.is_some());
    assert!(after.last_job_completed.is_some());

    let health = harness.scheduler.health().await.unwrap();
    assert_eq!(health.jobs_processed, 1);
    assert_eq!(health.jobs_failed, 0);
    assert_eq!(health.in_flight_jobs, 0);
}

#[tokio::test]
async fn test_rejected_slice_fails_job_with_worker_message() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(4),
        FakeWorkerClient::new(SliceBehavior::gated(
            &gate,
            SliceBehavior::Reject("out of memory".to_string()),
        )),
    );
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let queued = harness.add_job(job(1, Utc::now())).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 1);

    gate.add_permits(1);
    harness.drain().await;

    let failed = harness.job(queued.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("out of memory"));

    let after = harness.worker(worker.id).await;
    assert_eq!(after.current_active_jobs, 0);
    assert_eq!(after.total_jobs_failed, 1);
    // Slice failures never touch health status
    assert_eq!(after.status, slicer_fleet::models::WorkerStatus::Healthy);

    let assignments = harness.store.list_assignments_for_job(queued.id).await.unwrap();
    assert_eq!(assignments[0].status, AssignmentStatus::Failed);
    assert_eq!(assignments[0].last_error_message.as_deref(), Some("out of memory"));
}

#[tokio::test]
async fn test_http_error_fails_only_that_job() {
    let harness = Harness::new(test_config(4));
    let broken = harness.add_worker(healthy_worker("slicer-broken", 1, 1)).await;
    let good = harness.add_worker(healthy_worker("slicer-good", 2, 1)).await;
    harness
        .client
        .set_slice(broken.id, SliceBehavior::HttpError(500, "slicer crashed".to_string()));

    let first = harness.add_job(job(2, minutes_ago(2))).await;
    let second = harness.add_job(job(1, minutes_ago(1))).await;

    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 2);
    harness.drain().await;

    let first = harness.job(first.id).await;
    assert_eq!(first.status, JobStatus::Failed);
    assert_eq!(first.error_message.as_deref(), Some("slicer crashed"));
    assert_eq!(harness.job(second.id).await.status, JobStatus::Completed);
    assert_eq!(harness.worker(good.id).await.total_jobs_processed, 1);
}

#[tokio::test]
async fn test_slice_timeout_fails_with_timeout() {
    let mut config = test_config(4);
    config.worker_client.slice_timeout_seconds = 1;
    let harness = Harness::with_client(config, FakeWorkerClient::new(SliceBehavior::Hang));
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 1)).await;
    let queued = harness.add_job(job(1, Utc::now())).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    harness.drain().await;

    let failed = harness.job(queued.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("timeout"));
    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 0);
}

#[tokio::test]
async fn test_stale_sweep_recovers_orphaned_job() {
    let harness = Harness::new(test_config(4));
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let stuck = harness.add_job(job(1, minutes_ago(45))).await;

    // State left behind by a process that died mid-slice
    let started = minutes_ago(40);
    assert!(harness.store.mark_job_processing(stuck.id, started).await.unwrap());
    let assignment = harness
        .store
        .insert_assignment(NewAssignment {
            job_id: stuck.id,
            worker_id: worker.id,
            assigned_at: started,
            priority: stuck.priority,
            queue_wait_seconds: 300,
            retry_count: 0,
        })
        .await
        .unwrap();
    harness.store.mark_assignment_running(assignment.id, started).await.unwrap();
    harness.store.adjust_active_jobs(worker.id, 1).await.unwrap();
    harness.registry.load_all().await.unwrap();
    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 1);

    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 1);

    let failed = harness.job(stuck.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("timed out"));
    assert!(failed.completed_at.is_some());

    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 0);
    assert_eq!(harness.registry.get(worker.id).unwrap().current_active_jobs, 0);

    let assignments = harness.store.list_assignments_for_job(stuck.id).await.unwrap();
    assert_eq!(assignments[0].status, AssignmentStatus::Failed);

    // Recovered without a slice call ending, so only the failure counter moves
    let health = harness.scheduler.health().await.unwrap();
    assert_eq!(health.jobs_failed, 1);
    assert_eq!(health.jobs_processed, 0);

    // A second sweep finds nothing
    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_sweep_takes_over_in_flight_job_and_drops_late_result() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(4),
        FakeWorkerClient::new(SliceBehavior::gated(&gate, SliceBehavior::Succeed)),
    );
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let queued = harness.add_job(job(1, minutes_ago(50))).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    assert!(harness.scheduler.is_in_flight(queued.id));

    // Pretend the worker has been silent for 40 minutes
    let mut processing = harness.job(queued.id).await;
    processing.started_at = Some(minutes_ago(40));
    harness.store.put_job(processing);

    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 1);
    assert!(!harness.scheduler.is_in_flight(queued.id));
    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 0);

    // Releasing the worker's answer changes nothing; the job stays failed and
    // nothing is counted twice
    gate.add_permits(1);
    harness.drain().await;

    let job = harness.job(queued.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let after = harness.worker(worker.id).await;
    assert_eq!(after.current_active_jobs, 0);
    assert_eq!(after.total_jobs_processed, 1);
    assert_eq!(after.total_jobs_failed, 1);
}

#[tokio::test]
async fn test_stale_takeover_frees_concurrency_for_next_tick() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::with_client(
        test_config(1),
        FakeWorkerClient::new(SliceBehavior::gated(&gate, SliceBehavior::Succeed)),
    );
    harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let silent = harness.add_job(job(5, minutes_ago(50))).await;
    let next = harness.add_job(job(1, minutes_ago(45))).await;

    assert_eq!(ran(harness.scheduler.run_tick().await.unwrap()).dispatched, 1);
    assert!(harness.scheduler.is_in_flight(silent.id));

    let mut processing = harness.job(silent.id).await;
    processing.started_at = Some(minutes_ago(40));
    harness.store.put_job(processing);
    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 1);

    // Let the runtime drop the abandoned slice task
    tokio::task::yield_now().await;

    // The only execution permit is free again, well before the slice timeout
    let summary = ran(harness.scheduler.run_tick().await.unwrap());
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.skipped, 0);
    assert!(harness.scheduler.is_in_flight(next.id));

    gate.add_permits(1);
    assert!(harness.scheduler.drain(std::time::Duration::from_secs(5)).await);

    assert_eq!(harness.job(silent.id).await.status, JobStatus::Failed);
    assert_eq!(harness.job(next.id).await.status, JobStatus::Completed);
    assert_eq!(harness.scheduler.in_flight_count(), 0);
}

#[tokio::test]
async fn test_oversized_stale_threshold_recovers_nothing() {
    let mut config = test_config(4);
    config.scheduler.stale_job_threshold_minutes = u64::MAX;
    let harness = Harness::new(config);
    let running = harness.add_job(job(1, minutes_ago(90))).await;
    harness.store.mark_job_processing(running.id, minutes_ago(60)).await.unwrap();

    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 0);
    assert_eq!(harness.job(running.id).await.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_recent_processing_job_is_not_stale() {
    let harness = Harness::new(test_config(4));
    let running = harness.add_job(job(1, minutes_ago(10))).await;
    harness.store.mark_job_processing(running.id, minutes_ago(5)).await.unwrap();

    assert_eq!(harness.scheduler.sweep_stale_jobs().await.unwrap(), 0);
    assert_eq!(harness.job(running.id).await.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_job_changed_underneath_dispatch_is_rolled_back() {
    let harness = Harness::new(test_config(4));
    let worker = harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let snapshot = harness.add_job(job(1, Utc::now())).await;

    // Someone else claims the job after the snapshot was taken
    harness.store.mark_job_processing(snapshot.id, Utc::now()).await.unwrap();

    let outcome = harness.scheduler.dispatch(snapshot.clone()).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Skipped);

    let assignments = harness.store.list_assignments_for_job(snapshot.id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].status, AssignmentStatus::Cancelled);
    assert_eq!(harness.worker(worker.id).await.current_active_jobs, 0);
    assert!(harness.client.slice_calls().is_empty());
}

#[tokio::test]
async fn test_disabled_scheduler_does_nothing() {
    let harness = Harness::new(test_config(4));
    harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    let queued = harness.add_job(job(1, Utc::now())).await;

    harness.scheduler.set_enabled(false);
    assert_eq!(harness.scheduler.run_tick().await.unwrap(), TickOutcome::Disabled);
    assert_eq!(harness.job(queued.id).await.status, JobStatus::Queued);
    assert!(!harness.scheduler.health().await.unwrap().enabled);

    harness.scheduler.set_enabled(true);
    assert_eq!(ran(harness.scheduler.run_tick().await.unwrap()).dispatched, 1);
    harness.drain().await;
}

#[tokio::test]
async fn test_health_reports_degraded_when_queue_is_stuck() {
    let mut config = test_config(4);
    config.scheduler.degraded_after_seconds = 0;
    let harness = Harness::new(config);
    harness.add_job(job(1, Utc::now())).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let health = harness.scheduler.health().await.unwrap();
    assert_eq!(health.queued_jobs, 1);
    assert!(health.last_tick_at.is_some());
    assert!(health.last_progress_at.is_none());
    assert!(health.degraded);
}

#[tokio::test]
async fn test_healthy_scheduler_is_not_degraded() {
    let harness = Harness::new(test_config(4));
    harness.add_worker(healthy_worker("slicer-a", 1, 2)).await;
    harness.add_job(job(1, Utc::now())).await;

    ran(harness.scheduler.run_tick().await.unwrap());
    harness.drain().await;

    let health = harness.scheduler.health().await.unwrap();
    assert_eq!(health.queued_jobs, 0);
    assert!(!health.degraded);
    assert!(health.last_progress_at.is_some());
}
