use super::arguments::JobArgument;
use super::context::JobContext;
use thiserror::Error;

/// How a running job should be handled when the worker shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur while performing a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Unknown job class: {0}")]
    UnknownJobClass(String),

    #[error("Failed to deserialize arguments: {0}")]
    Deserialization(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    /// Whether running the job again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::ExecutionFailed(_))
    }
}

/// A unit of work that can run inline or be deferred to the queue.
///
/// Jobs are executed synchronously in a blocking context. Arguments that were
/// records at enqueue time arrive already located again, so a job always sees
/// the current state of the record.
pub trait Job: Send + Sync {
    /// Stable name used to find this job when a queued entry is executed.
    fn job_class(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// Queue the job is enqueued on unless told otherwise.
    fn queue_name(&self) -> &'static str {
        "default"
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Perform the job.
    ///
    /// Long-running implementations should check `ctx.is_cancelled()` and
    /// return `JobError::Cancelled` when it is set.
    fn perform(&self, ctx: &JobContext, args: &[JobArgument]) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_failures_are_retryable() {
        assert!(JobError::ExecutionFailed("db locked".to_string()).is_retryable());

        assert!(!JobError::UnknownJobClass("X".to_string()).is_retryable());
        assert!(!JobError::Deserialization("gone".to_string()).is_retryable());
        assert!(!JobError::InvalidArguments("none".to_string()).is_retryable());
        assert!(!JobError::RecordNotFound("Friend 1".to_string()).is_retryable());
        assert!(!JobError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            JobError::ExecutionFailed("boom".to_string()).to_string(),
            "Execution failed: boom"
        );
        assert_eq!(JobError::Cancelled.to_string(), "Job was cancelled");
    }
}
