//! Entry points for running jobs inline or deferring them to the queue.

use super::arguments::{serialize_arguments, JobArgument};
use super::context::JobContext;
use super::job::JobError;
use super::queue_store::{EnqueuedJob, JobQueueStore};
use super::registry::JobRegistry;
use super::worker::WorkerHandle;
use crate::metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct JobDispatcher {
    registry: Arc<JobRegistry>,
    queue_store: Arc<dyn JobQueueStore>,
    context: JobContext,
    max_attempts: u32,
    worker: Option<WorkerHandle>,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue_store: Arc<dyn JobQueueStore>,
        context: JobContext,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            queue_store,
            context,
            max_attempts,
            worker: None,
        }
    }

    /// Wake this worker whenever a job is enqueued.
    pub fn with_worker_handle(mut self, handle: WorkerHandle) -> Self {
        self.worker = Some(handle);
        self
    }

    /// Runs the job in the calling thread, bypassing the queue.
    ///
    /// Async callers should wrap this in `spawn_blocking`.
    pub fn perform_now(&self, job_class: &str, args: &[JobArgument]) -> Result<(), JobError> {
        let job = self
            .registry
            .get(job_class)
            .ok_or_else(|| JobError::UnknownJobClass(job_class.to_string()))?;

        let start = Instant::now();
        let result = job.perform(&self.context.child(), args);
        let outcome = match &result {
            Ok(()) => "completed",
            Err(_) => "failed",
        };
        metrics::record_job_performed(job_class, outcome, start.elapsed());
        debug!(
            "Performed {} inline in {:?}: {}",
            job_class,
            start.elapsed(),
            outcome
        );
        result
    }

    /// Enqueues the job to run as soon as a worker picks it up.
    pub fn perform_later(&self, job_class: &str, args: &[JobArgument]) -> Result<EnqueuedJob> {
        self.perform_later_at(job_class, args, Utc::now())
    }

    /// Enqueues the job to run once `delay` has passed.
    pub fn perform_later_in(
        &self,
        job_class: &str,
        args: &[JobArgument],
        delay: Duration,
    ) -> Result<EnqueuedJob> {
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .with_context(|| format!("Delay of {:?} is out of range", delay))?;
        self.perform_later_at(job_class, args, scheduled_at)
    }

    /// Enqueues the job to run no earlier than `scheduled_at`.
    pub fn perform_later_at(
        &self,
        job_class: &str,
        args: &[JobArgument],
        scheduled_at: DateTime<Utc>,
    ) -> Result<EnqueuedJob> {
        let job = self
            .registry
            .get(job_class)
            .ok_or_else(|| JobError::UnknownJobClass(job_class.to_string()))?;

        let arguments = serialize_arguments(args, self.context.app())
            .with_context(|| format!("Failed to serialize arguments for {}", job_class))?;
        let enqueued = EnqueuedJob::new(
            job_class,
            job.queue_name(),
            arguments,
            self.max_attempts,
            scheduled_at,
        );
        self.queue_store.enqueue(&enqueued)?;
        metrics::record_job_enqueued(job_class, &enqueued.queue_name);
        info!(
            "Enqueued {} ({}) to run at {}",
            job_class,
            enqueued.job_id,
            enqueued.scheduled_at.to_rfc3339()
        );

        if let Some(worker) = &self.worker {
            worker.wake();
        }
        Ok(enqueued)
    }
}
