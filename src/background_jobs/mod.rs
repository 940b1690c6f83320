//! Job execution system.
//!
//! Jobs either run inline through [`JobDispatcher::perform_now`] or are
//! persisted to the queue with [`JobDispatcher::perform_later`] and picked up
//! by a [`JobWorker`]. Queued record arguments are stored as global ids and
//! located again right before the job performs.

mod arguments;
mod context;
mod dispatcher;
mod job;
pub mod jobs;
pub mod queue_store;
mod registry;
mod retry_policy;
mod worker;

pub use arguments::{
    deserialize_arguments, serialize_arguments, ArgumentError, JobArgument, GLOBALID_KEY,
};
pub use context::JobContext;
pub use dispatcher::JobDispatcher;
pub use job::{Job, JobError, ShutdownBehavior};
pub use queue_store::{
    EnqueuedJob, ExecutionStatus, JobExecution, JobQueueStore, JobStatus, QueueStats,
    SqliteJobQueueStore,
};
pub use registry::JobRegistry;
pub use retry_policy::RetryPolicy;
pub use worker::{
    create_worker, JobOutcome, JobRunner, JobWorker, WorkerCommand, WorkerHandle, WorkerOptions,
};
