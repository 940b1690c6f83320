//! End-to-end tests for the long-running worker

mod common;

use chrono::Utc;
use common::TestApp;
use friends_jobs::background_jobs::JobStatus;
use friends_jobs::CapitalizeNameJob;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_worker_picks_up_job_when_woken() {
    let t = TestApp::spawn();
    let (mut worker, handle) = t.app.worker();
    let worker_task = tokio::spawn(async move { worker.run().await });

    let dispatcher = t.app.dispatcher().with_worker_handle(handle);
    let job = CapitalizeNameJob::perform_later(&dispatcher, &t.john_smith).unwrap();

    let done = t
        .wait_until(Duration::from_secs(5), || {
            t.app.queue_store.get_job(&job.job_id).unwrap().unwrap().status == JobStatus::Completed
        })
        .await;
    assert!(done);
    assert_eq!(t.friend(t.john_smith.id).unwrap().name, "John smith");

    t.shutdown_token.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker_task)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_delayed_job_waits_for_schedule() {
    let t = TestApp::spawn();
    let dispatcher = t.app.dispatcher();
    let job = dispatcher
        .perform_later_in(
            CapitalizeNameJob::JOB_CLASS,
            &[t.john.clone().into()],
            Duration::from_secs(3600),
        )
        .unwrap();

    let (worker, _handle) = t.app.worker();
    assert_eq!(worker.drain().await.unwrap(), 0);
    assert_eq!(t.friend(t.john.id).unwrap().name, "john");

    let stored = t.app.queue_store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_restarted_worker_requeues_interrupted_job() {
    let t = TestApp::spawn();
    let job = CapitalizeNameJob::perform_later(&t.app.dispatcher(), &t.john).unwrap();

    // A worker claimed the job and then died
    let claimed = t
        .app
        .queue_store
        .claim_next(Utc::now(), &["default".to_string()], "crashed-worker")
        .unwrap()
        .unwrap();
    assert_eq!(claimed.job_id, job.job_id);

    let restart_token = CancellationToken::new();
    let restarted = t.reopen(restart_token.clone());
    let (mut worker, _handle) = restarted.worker();
    let worker_task = tokio::spawn(async move { worker.run().await });

    let done = t
        .wait_until(Duration::from_secs(5), || {
            t.app.queue_store.get_job(&job.job_id).unwrap().unwrap().status == JobStatus::Completed
        })
        .await;
    assert!(done);
    assert_eq!(t.friend(t.john.id).unwrap().name, "John");

    let executions = t.app.queue_store.get_executions(&job.job_id).unwrap();
    assert_eq!(executions.len(), 1);

    restart_token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_task).await;
}

#[tokio::test]
async fn test_second_worker_leaves_live_claim_alone() {
    let t = TestApp::spawn();
    let job = CapitalizeNameJob::perform_later(&t.app.dispatcher(), &t.john).unwrap();
    t.app
        .queue_store
        .claim_next(Utc::now(), &["default".to_string()], "live-worker")
        .unwrap()
        .unwrap();

    // The first worker keeps reporting while it runs the job
    let queue_store = t.app.queue_store.clone();
    let heartbeats = tokio::spawn(async move {
        for _ in 0..10 {
            queue_store.heartbeat("live-worker").unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let second_token = CancellationToken::new();
    let second = t.reopen(second_token.clone());
    let (mut worker, _handle) = second.worker();
    let worker_task = tokio::spawn(async move { worker.run().await });

    heartbeats.await.unwrap();
    let stored = t.app.queue_store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.locked_by.as_deref(), Some("live-worker"));
    assert_eq!(stored.executions, 1);
    assert_eq!(t.friend(t.john.id).unwrap().name, "john");

    // Heartbeats stopped, so the second worker takes over
    let done = t
        .wait_until(Duration::from_secs(5), || {
            t.app.queue_store.get_job(&job.job_id).unwrap().unwrap().status == JobStatus::Completed
        })
        .await;
    assert!(done);
    assert_eq!(t.friend(t.john.id).unwrap().name, "John");

    second_token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_task).await;
}

#[tokio::test]
async fn test_prune_removes_finished_jobs() {
    let t = TestApp::spawn();
    let done = CapitalizeNameJob::perform_later(&t.app.dispatcher(), &t.john).unwrap();
    let (worker, _handle) = t.app.worker();
    worker.drain().await.unwrap();
    let waiting = t
        .app
        .dispatcher()
        .perform_later_in(
            CapitalizeNameJob::JOB_CLASS,
            &[t.john_smith.clone().into()],
            Duration::from_secs(3600),
        )
        .unwrap();

    let deleted = t
        .app
        .queue_store
        .prune_finished_before(Utc::now() + chrono::Duration::seconds(1))
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(t.app.queue_store.get_job(&done.job_id).unwrap().is_none());
    assert!(t.app.queue_store.get_job(&waiting.job_id).unwrap().is_some());
}
