//! Worker that executes queued jobs.

use super::arguments::deserialize_arguments;
use super::context::JobContext;
use super::job::{JobError, ShutdownBehavior};
use super::queue_store::{EnqueuedJob, ExecutionStatus, JobQueueStore};
use super::registry::JobRegistry;
use super::retry_policy::RetryPolicy;
use crate::config::WorkerSettings;
use crate::metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub concurrency: usize,
    /// Queues to take jobs from. Empty means all of them.
    pub queues: Vec<String>,
    /// How long shutdown waits for each running job.
    pub shutdown_timeout: Duration,
    /// A running job whose worker has not sent a heartbeat for this long is
    /// considered abandoned and goes back to the queue.
    pub lease_timeout: Duration,
}

impl WorkerOptions {
    fn heartbeat_interval(&self) -> Duration {
        (self.lease_timeout / 3).max(Duration::from_millis(100))
    }

    /// Heartbeats older than this belong to workers that are gone.
    fn stale_before(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.lease_timeout)
            .ok()
            .and_then(|lease| Utc::now().checked_sub_signed(lease))
    }
}

impl From<&WorkerSettings> for WorkerOptions {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            concurrency: settings.concurrency.max(1),
            queues: settings.queues.clone(),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            lease_timeout: Duration::from_secs(settings.lease_timeout_secs),
        }
    }
}

/// What happened to a job after one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Will run again at the given time.
    Retried(DateTime<Utc>),
    /// Retryable error with no attempts left.
    Failed,
    /// Error that retrying cannot fix.
    Discarded,
    /// Cancelled, back to pending with the attempt returned.
    Released,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Retried(_) => "retried",
            JobOutcome::Failed => "failed",
            JobOutcome::Discarded => "discarded",
            JobOutcome::Released => "released",
        }
    }
}

/// Executes one claimed job and records the result.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    queue_store: Arc<dyn JobQueueStore>,
    retry_policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue_store: Arc<dyn JobQueueStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            queue_store,
            retry_policy,
        }
    }

    /// Runs a job previously returned by `claim_next`.
    pub async fn run(&self, job: EnqueuedJob, ctx: JobContext) -> JobOutcome {
        let execution_id = match self
            .queue_store
            .record_execution_start(&job.job_id, job.executions)
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to record execution start for {}: {}", job.job_id, e);
                None
            }
        };

        info!(
            "Starting job {} ({}, attempt {}/{})",
            job.job_class, job.job_id, job.executions, job.max_attempts
        );

        metrics::set_job_running(&job.job_class, true);
        let start_time = Instant::now();
        let result = match self.registry.get(&job.job_class) {
            Some(performer) => {
                let arguments = job.arguments.clone();
                tokio::task::spawn_blocking(move || {
                    let args = deserialize_arguments(&arguments, ctx.locator.as_ref())?;
                    performer.perform(&ctx, &args)
                })
                .await
                .unwrap_or_else(|e| Err(JobError::ExecutionFailed(format!("Task panic: {}", e))))
            }
            None => Err(JobError::UnknownJobClass(job.job_class.clone())),
        };
        let elapsed = start_time.elapsed();
        metrics::set_job_running(&job.job_class, false);

        let outcome = self.settle(&job, result.as_ref().err());
        match (&outcome, &result) {
            (JobOutcome::Completed, _) => {
                info!("Job {} ({}) completed in {:?}", job.job_class, job.job_id, elapsed)
            }
            (JobOutcome::Released, _) => info!(
                "Job {} ({}) was cancelled after {:?}, released back to the queue",
                job.job_class, job.job_id, elapsed
            ),
            (JobOutcome::Retried(run_at), Err(e)) => warn!(
                "Job {} ({}) failed: {}. Retrying at {}",
                job.job_class,
                job.job_id,
                e,
                run_at.to_rfc3339()
            ),
            (_, Err(e)) => error!(
                "Job {} ({}) {} after {} executions: {}",
                job.job_class,
                job.job_id,
                outcome.label(),
                job.executions,
                e
            ),
            _ => {}
        }

        if let Some(execution_id) = execution_id {
            let (status, message) = match &result {
                Ok(()) => (ExecutionStatus::Completed, None),
                Err(JobError::Cancelled) => (ExecutionStatus::Cancelled, None),
                Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
            };
            if let Err(e) =
                self.queue_store
                    .record_execution_finish(execution_id, status, message.as_deref())
            {
                error!("Failed to record execution finish for {}: {}", job.job_id, e);
            }
        }

        metrics::record_job_performed(&job.job_class, outcome.label(), elapsed);
        outcome
    }

    /// Applies the retry policy and moves the job to its next state.
    fn settle(&self, job: &EnqueuedJob, error: Option<&JobError>) -> JobOutcome {
        let (outcome, stored) = match error {
            None => (
                JobOutcome::Completed,
                self.queue_store.mark_completed(&job.job_id),
            ),
            Some(JobError::Cancelled) => (JobOutcome::Released, self.queue_store.release(&job.job_id)),
            Some(err) => {
                // Jobs keep the attempt budget they were enqueued with
                let policy = RetryPolicy {
                    max_attempts: job.max_attempts,
                    ..self.retry_policy.clone()
                };
                let message = err.to_string();
                if policy.should_retry(err, job.executions) {
                    let run_at = policy.next_retry_at(job.executions);
                    (
                        JobOutcome::Retried(run_at),
                        self.queue_store.reschedule(&job.job_id, run_at, &message),
                    )
                } else if err.is_retryable() {
                    (
                        JobOutcome::Failed,
                        self.queue_store.mark_failed(&job.job_id, &message),
                    )
                } else {
                    (
                        JobOutcome::Discarded,
                        self.queue_store.mark_discarded(&job.job_id, &message),
                    )
                }
            }
        };

        if let Err(e) = stored {
            error!(
                "Failed to store {} state for job {}: {}",
                outcome.label(),
                job.job_id,
                e
            );
        }
        outcome
    }
}

/// Commands accepted by a running [`JobWorker`].
#[derive(Debug)]
pub enum WorkerCommand {
    /// New work may be available, poll now.
    Wake,
}

/// Handle for poking a [`JobWorker`] from other tasks.
#[derive(Clone)]
pub struct WorkerHandle {
    command_sender: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn wake(&self) {
        // A full channel already holds a pending wake-up
        if let Err(mpsc::error::TrySendError::Closed(_)) =
            self.command_sender.try_send(WorkerCommand::Wake)
        {
            debug!("Worker is gone, dropping wake-up");
        }
    }
}

struct RunningJob {
    job_class: String,
    handle: JoinHandle<JobOutcome>,
    cancel_token: CancellationToken,
    shutdown_behavior: ShutdownBehavior,
}

/// Polls the queue and runs up to `concurrency` jobs at once.
pub struct JobWorker {
    /// Recorded on every claim so other workers leave those jobs alone.
    worker_id: String,
    runner: JobRunner,
    queue_store: Arc<dyn JobQueueStore>,
    registry: Arc<JobRegistry>,
    /// Root context; its token is the worker's shutdown signal.
    context: JobContext,
    options: WorkerOptions,
    command_receiver: mpsc::Receiver<WorkerCommand>,
    job_finished: Arc<Notify>,
    running: HashMap<String, RunningJob>,
}

impl JobWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        queue_store: Arc<dyn JobQueueStore>,
        context: JobContext,
        retry_policy: RetryPolicy,
        options: WorkerOptions,
        command_receiver: mpsc::Receiver<WorkerCommand>,
    ) -> Self {
        Self {
            worker_id: format!("{}-{}", std::process::id(), Uuid::new_v4()),
            runner: JobRunner::new(registry.clone(), queue_store.clone(), retry_policy),
            queue_store,
            registry,
            context,
            options,
            command_receiver,
            job_finished: Arc::new(Notify::new()),
            running: HashMap::new(),
        }
    }

    pub async fn run(&mut self) {
        info!(
            "Starting job worker {} (concurrency {}, queues {:?}, {} job classes)",
            self.worker_id,
            self.options.concurrency,
            self.options.queues,
            self.registry.len()
        );

        let _heartbeat = self.start_heartbeat();
        self.requeue_abandoned_jobs();
        let mut last_requeue = Instant::now();

        let shutdown_token = self.context.cancellation_token.clone();
        loop {
            self.cleanup_finished_jobs().await;
            if last_requeue.elapsed() >= self.options.lease_timeout {
                self.requeue_abandoned_jobs();
                last_requeue = Instant::now();
            }
            self.claim_available_jobs();
            self.refresh_queue_depth();

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = self.job_finished.notified() => {}
                Some(cmd) = self.command_receiver.recv() => {
                    match cmd {
                        WorkerCommand::Wake => debug!("Worker woken up"),
                    }
                }
                _ = shutdown_token.cancelled() => {
                    info!("Worker received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Runs due jobs one at a time until none are left.
    ///
    /// Returns the number of executions performed.
    pub async fn drain(&self) -> Result<usize> {
        let _heartbeat = self.start_heartbeat();
        self.requeue_abandoned_jobs();

        let mut performed = 0;
        while let Some(job) =
            self.queue_store
                .claim_next(Utc::now(), &self.options.queues, &self.worker_id)?
        {
            if self.context.is_cancelled() {
                self.queue_store.release(&job.job_id)?;
                break;
            }
            self.runner.run(job, self.context.child()).await;
            performed += 1;
        }
        self.refresh_queue_depth();
        Ok(performed)
    }

    /// Keeps this worker's claims fresh until the returned guard is dropped.
    fn start_heartbeat(&self) -> DropGuard {
        let token = CancellationToken::new();
        let stopped = token.clone();
        let queue_store = Arc::clone(&self.queue_store);
        let worker_id = self.worker_id.clone();
        let interval = self.options.heartbeat_interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.cancelled() => break,
                }
                if let Err(e) = queue_store.heartbeat(&worker_id) {
                    warn!("Failed to send heartbeat for worker {}: {}", worker_id, e);
                }
            }
        });
        token.drop_guard()
    }

    /// Puts jobs of workers that stopped sending heartbeats back in the queue.
    fn requeue_abandoned_jobs(&self) {
        let Some(stale_before) = self.options.stale_before() else {
            return;
        };
        match self.queue_store.requeue_interrupted(stale_before) {
            Ok(count) if count > 0 => {
                info!("Requeued {} jobs abandoned by a stopped worker", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to requeue abandoned jobs: {}", e);
            }
        }
    }

    fn claim_available_jobs(&mut self) {
        if self.context.is_cancelled() {
            return;
        }
        while self.running.len() < self.options.concurrency {
            match self
                .queue_store
                .claim_next(Utc::now(), &self.options.queues, &self.worker_id)
            {
                Ok(Some(job)) => self.spawn_job(job),
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to claim next job: {}", e);
                    break;
                }
            }
        }
    }

    fn spawn_job(&mut self, job: EnqueuedJob) {
        let ctx = self.context.child();
        let cancel_token = ctx.cancellation_token.clone();
        let shutdown_behavior = self
            .registry
            .get(&job.job_class)
            .map(|j| j.shutdown_behavior())
            .unwrap_or_default();

        let job_id = job.job_id.clone();
        let job_class = job.job_class.clone();
        let runner = self.runner.clone();
        let job_finished = Arc::clone(&self.job_finished);

        let handle = tokio::spawn(async move {
            let outcome = runner.run(job, ctx).await;
            job_finished.notify_one();
            outcome
        });

        self.running.insert(
            job_id,
            RunningJob {
                job_class,
                handle,
                cancel_token,
                shutdown_behavior,
            },
        );
    }

    async fn cleanup_finished_jobs(&mut self) {
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, running)| running.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            if let Some(running) = self.running.remove(&job_id) {
                if let Err(e) = running.handle.await {
                    error!("Job task {} ({}) panicked: {}", running.job_class, job_id, e);
                }
            }
        }
    }

    fn refresh_queue_depth(&self) {
        match self.queue_store.get_stats() {
            Ok(stats) => metrics::update_queue_depth(&stats),
            Err(e) => warn!("Failed to read queue stats: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down worker with {} running jobs...", self.running.len());

        for (job_id, running) in &self.running {
            if running.shutdown_behavior == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", job_id);
                running.cancel_token.cancel();
            }
        }

        for (job_id, running) in self.running.drain() {
            if running.shutdown_behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} ({}) to complete...", running.job_class, job_id);
            }
            if tokio::time::timeout(self.options.shutdown_timeout, running.handle)
                .await
                .is_err()
            {
                warn!(
                    "Job {} ({}) did not finish within {:?}, it will be requeued on next start",
                    running.job_class, job_id, self.options.shutdown_timeout
                );
            }
        }

        info!("Worker shutdown complete");
    }
}

/// Create a worker and its handle.
pub fn create_worker(
    registry: Arc<JobRegistry>,
    queue_store: Arc<dyn JobQueueStore>,
    context: JobContext,
    settings: &WorkerSettings,
) -> (JobWorker, WorkerHandle) {
    let (command_sender, command_receiver) = mpsc::channel(16);
    let worker = JobWorker::new(
        registry,
        queue_store,
        context,
        RetryPolicy::new(settings),
        WorkerOptions::from(settings),
        command_receiver,
    );
    (worker, WorkerHandle { command_sender })
}
