//! Durable storage for queued jobs.

mod models;
mod schema;
mod sqlite_queue_store;

pub use models::{EnqueuedJob, ExecutionStatus, JobExecution, JobStatus, QueueStats};
pub use schema::JOBS_VERSIONED_SCHEMAS;
pub use sqlite_queue_store::SqliteJobQueueStore;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Storage operations backing the job queue.
///
/// State transitions are atomic: a job claimed by one worker is never handed
/// to another until it is released or rescheduled.
pub trait JobQueueStore: Send + Sync {
    // === Queue Management ===

    fn enqueue(&self, job: &EnqueuedJob) -> Result<()>;

    fn get_job(&self, job_id: &str) -> Result<Option<EnqueuedJob>>;

    /// Claims the oldest due pending job (PENDING -> RUNNING) for `worker_id`
    /// and bumps its execution count. An empty `queues` slice means every queue.
    fn claim_next(
        &self,
        now: DateTime<Utc>,
        queues: &[String],
        worker_id: &str,
    ) -> Result<Option<EnqueuedJob>>;

    /// Refreshes the heartbeat of every job `worker_id` is running.
    fn heartbeat(&self, worker_id: &str) -> Result<usize>;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EnqueuedJob>>;

    fn get_stats(&self) -> Result<QueueStats>;

    // === State Transitions ===

    fn mark_completed(&self, job_id: &str) -> Result<()>;

    /// Puts a running job back to pending, due at `run_at`.
    fn reschedule(&self, job_id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()>;

    /// Puts a running job back to pending without consuming the attempt.
    fn release(&self, job_id: &str) -> Result<()>;

    /// Retryable error with no attempts left.
    fn mark_failed(&self, job_id: &str, error: &str) -> Result<()>;

    /// Error that no retry can fix.
    fn mark_discarded(&self, job_id: &str, error: &str) -> Result<()>;

    /// Moves a failed or discarded job back to pending with a fresh attempt budget.
    /// Returns false when the job does not exist or is not in a terminal error state.
    fn retry_job(&self, job_id: &str) -> Result<bool>;

    /// Returns running jobs whose last heartbeat is older than `stale_before`
    /// to pending. Jobs of live workers keep their claim.
    fn requeue_interrupted(&self, stale_before: DateTime<Utc>) -> Result<usize>;

    /// Deletes completed, failed and discarded jobs finished before `before`.
    fn prune_finished_before(&self, before: DateTime<Utc>) -> Result<usize>;

    // === Execution History ===

    fn record_execution_start(&self, job_id: &str, attempt: u32) -> Result<i64>;

    fn record_execution_finish(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    fn get_executions(&self, job_id: &str) -> Result<Vec<JobExecution>>;
}

/// Finish time before which `prune_finished_before` deletes, for an age in hours.
pub fn prune_cutoff(now: DateTime<Utc>, older_than_hours: u64) -> Result<DateTime<Utc>> {
    i64::try_from(older_than_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("Age of {} hours is out of range", older_than_hours))
}
