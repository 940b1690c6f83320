use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Discarded,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "discarded" => Some(JobStatus::Discarded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Discarded
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A job waiting in, or already processed by, the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueuedJob {
    pub job_id: String,
    pub job_class: String,
    pub queue_name: String,
    /// Serialized arguments, see `background_jobs::serialize_arguments`.
    pub arguments: JsonValue,
    pub status: JobStatus,
    /// Number of times the job has been claimed for execution.
    pub executions: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may run.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Worker holding the claim while the job is running.
    pub locked_by: Option<String>,
}

impl EnqueuedJob {
    pub fn new(
        job_class: impl Into<String>,
        queue_name: impl Into<String>,
        arguments: JsonValue,
        max_attempts: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_class: job_class.into(),
            queue_name: queue_name.into(),
            arguments,
            status: JobStatus::Pending,
            executions: 0,
            max_attempts,
            enqueued_at: Utc::now(),
            scheduled_at,
            started_at: None,
            finished_at: None,
            last_error: None,
            locked_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    /// Stopped by shutdown; the attempt was given back to the job.
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// One attempt at running a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobExecution {
    pub id: i64,
    pub job_id: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrips_through_db_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Discarded,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn test_execution_status_roundtrips_through_db_text() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Discarded.is_terminal());
    }

    #[test]
    fn test_new_job_is_pending() {
        let now = Utc::now();
        let job = EnqueuedJob::new("CapitalizeNameJob", "default", serde_json::json!([]), 3, now);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.executions, 0);
        assert_eq!(job.scheduled_at, now);
        assert!(job.locked_by.is_none());
        assert!(Uuid::parse_str(&job.job_id).is_ok());
    }

    #[test]
    fn test_queue_stats_total() {
        let stats = QueueStats {
            pending: 1,
            running: 2,
            completed: 3,
            failed: 4,
            discarded: 5,
        };
        assert_eq!(stats.total(), 15);
    }
}
