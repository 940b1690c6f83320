//! SQLite implementation of [`JobQueueStore`].

use super::models::{EnqueuedJob, ExecutionStatus, JobExecution, JobStatus, QueueStats};
use super::schema::JOBS_VERSIONED_SCHEMAS;
use super::JobQueueStore;
use crate::sqlite_persistence::prepare_database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const JOB_COLUMNS: &str = "job_id, job_class, queue_name, arguments, status, executions, \
     max_attempts, enqueued_at, scheduled_at, started_at, finished_at, last_error, locked_by";

const INTERRUPTED_ERROR: &str = "Interrupted (worker stopped responding)";

/// Running jobs whose claim has lapsed.
const STALE_RUNNING: &str =
    "status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?1)";

pub struct SqliteJobQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobQueueStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open jobs database")?;
        if is_new_db {
            info!("Creating new jobs database at {:?}", path);
        }
        // Workers and the CLI may share the file
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        prepare_database(&mut conn, JOBS_VERSIONED_SCHEMAS, "jobs", is_new_db)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        prepare_database(&mut conn, JOBS_VERSIONED_SCHEMAS, "jobs", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(
            idx, millis,
        ))
    }

    fn opt_from_millis(idx: usize, millis: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
        millis.map(|m| Self::from_millis(idx, m)).transpose()
    }

    fn conversion_error(
        idx: usize,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<EnqueuedJob> {
        let arguments: String = row.get("arguments")?;
        let status: String = row.get("status")?;
        Ok(EnqueuedJob {
            job_id: row.get("job_id")?,
            job_class: row.get("job_class")?,
            queue_name: row.get("queue_name")?,
            arguments: serde_json::from_str(&arguments).map_err(|e| Self::conversion_error(3, e))?,
            status: JobStatus::parse(&status).ok_or_else(|| {
                Self::conversion_error(4, std::io::Error::other(format!("bad status {status}")))
            })?,
            executions: row.get("executions")?,
            max_attempts: row.get("max_attempts")?,
            enqueued_at: Self::from_millis(7, row.get("enqueued_at")?)?,
            scheduled_at: Self::from_millis(8, row.get("scheduled_at")?)?,
            started_at: Self::opt_from_millis(9, row.get("started_at")?)?,
            finished_at: Self::opt_from_millis(10, row.get("finished_at")?)?,
            last_error: row.get("last_error")?,
            locked_by: row.get("locked_by")?,
        })
    }

    fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<JobExecution> {
        let status: String = row.get("status")?;
        Ok(JobExecution {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            attempt: row.get("attempt")?,
            started_at: Self::from_millis(3, row.get("started_at")?)?,
            finished_at: Self::opt_from_millis(4, row.get("finished_at")?)?,
            status: ExecutionStatus::parse(&status).ok_or_else(|| {
                Self::conversion_error(5, std::io::Error::other(format!("bad status {status}")))
            })?,
            error_message: row.get("error_message")?,
        })
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Finishes a running job with a terminal status.
    fn finish_job(&self, job_id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, finished_at = ?2, last_error = ?3,
                 locked_by = NULL, heartbeat_at = NULL
             WHERE job_id = ?4",
            params![status.as_str(), Self::now(), error, job_id],
        )?;
        if updated == 0 {
            warn!("Tried to mark unknown job {} as {}", job_id, status);
        }
        Ok(())
    }
}

impl JobQueueStore for SqliteJobQueueStore {
    // === Queue Management ===

    fn enqueue(&self, job: &EnqueuedJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                job.job_id,
                job.job_class,
                job.queue_name,
                serde_json::to_string(&job.arguments)?,
                job.status.as_str(),
                job.executions,
                job.max_attempts,
                Self::to_millis(&job.enqueued_at),
                Self::to_millis(&job.scheduled_at),
                job.started_at.as_ref().map(Self::to_millis),
                job.finished_at.as_ref().map(Self::to_millis),
                job.last_error,
                job.locked_by,
            ],
        )
        .with_context(|| format!("Failed to enqueue job {}", job.job_id))?;
        debug!(
            "Enqueued {} job {} on queue {}",
            job.job_class, job.job_id, job.queue_name
        );
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<EnqueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn claim_next(
        &self,
        now: DateTime<Utc>,
        queues: &[String],
        worker_id: &str,
    ) -> Result<Option<EnqueuedJob>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND scheduled_at <= ?1"
        );
        let mut values = vec![Value::Integer(Self::to_millis(&now))];
        if !queues.is_empty() {
            let placeholders: Vec<String> = (0..queues.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND queue_name IN ({})", placeholders.join(", ")));
            values.extend(queues.iter().cloned().map(Value::Text));
        }
        sql.push_str(" ORDER BY scheduled_at ASC, enqueued_at ASC LIMIT 1");

        let candidate = tx
            .query_row(&sql, params_from_iter(values), Self::row_to_job)
            .optional()?;
        let Some(mut job) = candidate else {
            return Ok(None);
        };

        let started_at = Utc::now();
        tx.execute(
            "UPDATE jobs SET status = 'running', executions = executions + 1, started_at = ?1,
                 locked_by = ?2, heartbeat_at = ?1
             WHERE job_id = ?3 AND status = 'pending'",
            params![Self::to_millis(&started_at), worker_id, job.job_id],
        )?;
        tx.commit()?;

        job.status = JobStatus::Running;
        job.executions += 1;
        // Round-trip through millis so the value matches what a later read returns
        job.started_at = DateTime::from_timestamp_millis(Self::to_millis(&started_at));
        job.locked_by = Some(worker_id.to_string());
        Ok(Some(job))
    }

    fn heartbeat(&self, worker_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET heartbeat_at = ?1 WHERE status = 'running' AND locked_by = ?2",
            params![Self::now(), worker_id],
        )?;
        Ok(updated)
    }

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EnqueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let jobs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1
                     ORDER BY enqueued_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(
                    params![status.as_str(), limit as i64, offset as i64],
                    Self::row_to_job,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     ORDER BY enqueued_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], Self::row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(jobs)
    }

    fn get_stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                Some(JobStatus::Discarded) => stats.discarded = count,
                None => warn!("Ignoring {} jobs with unknown status '{}'", count, status),
            }
        }
        Ok(stats)
    }

    // === State Transitions ===

    fn mark_completed(&self, job_id: &str) -> Result<()> {
        self.finish_job(job_id, JobStatus::Completed, None)
    }

    fn reschedule(&self, job_id: &str, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'pending', scheduled_at = ?1, last_error = ?2,
                 locked_by = NULL, heartbeat_at = NULL
             WHERE job_id = ?3",
            params![Self::to_millis(&run_at), error, job_id],
        )?;
        Ok(())
    }

    fn release(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'pending', executions = MAX(executions - 1, 0), started_at = NULL,
                 locked_by = NULL, heartbeat_at = NULL
             WHERE job_id = ?1 AND status = 'running'",
            params![job_id],
        )?;
        Ok(())
    }

    fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        self.finish_job(job_id, JobStatus::Failed, Some(error))
    }

    fn mark_discarded(&self, job_id: &str, error: &str) -> Result<()> {
        self.finish_job(job_id, JobStatus::Discarded, Some(error))
    }

    fn retry_job(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = 'pending', executions = 0, scheduled_at = ?1,
                 started_at = NULL, finished_at = NULL, locked_by = NULL, heartbeat_at = NULL
             WHERE job_id = ?2 AND status IN ('failed', 'discarded')",
            params![Self::now(), job_id],
        )?;
        Ok(updated > 0)
    }

    fn requeue_interrupted(&self, stale_before: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cutoff = Self::to_millis(&stale_before);
        let now = Self::now();

        tx.execute(
            &format!(
                "UPDATE job_executions SET status = 'failed', finished_at = ?2, error_message = ?3
                 WHERE status = 'running' AND job_id IN (SELECT job_id FROM jobs WHERE {STALE_RUNNING})"
            ),
            params![cutoff, now, INTERRUPTED_ERROR],
        )?;
        // Jobs that already used their last attempt are not run again
        let exhausted = tx.execute(
            &format!(
                "UPDATE jobs SET status = 'failed', finished_at = ?2, last_error = ?3,
                     locked_by = NULL, heartbeat_at = NULL
                 WHERE {STALE_RUNNING} AND executions >= max_attempts"
            ),
            params![cutoff, now, INTERRUPTED_ERROR],
        )?;
        let requeued = tx.execute(
            &format!(
                "UPDATE jobs SET status = 'pending', scheduled_at = ?2, last_error = ?3,
                     locked_by = NULL, heartbeat_at = NULL
                 WHERE {STALE_RUNNING}"
            ),
            params![cutoff, now, INTERRUPTED_ERROR],
        )?;
        tx.commit()?;

        if exhausted > 0 {
            warn!("Marked {} interrupted jobs as failed (no attempts left)", exhausted);
        }
        Ok(requeued)
    }

    fn prune_finished_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let cutoff = Self::to_millis(&before);

        tx.execute(
            "DELETE FROM job_executions WHERE job_id IN (
                 SELECT job_id FROM jobs
                 WHERE status IN ('completed', 'failed', 'discarded') AND finished_at < ?1
             )",
            params![cutoff],
        )?;
        let deleted = tx.execute(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'discarded') AND finished_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    // === Execution History ===

    fn record_execution_start(&self, job_id: &str, attempt: u32) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_executions (job_id, attempt, started_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                attempt,
                Self::now(),
                ExecutionStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_execution_finish(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_executions SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![Self::now(), status.as_str(), error_message, execution_id],
        )?;
        Ok(())
    }

    fn get_executions(&self, job_id: &str) -> Result<Vec<JobExecution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, attempt, started_at, finished_at, status, error_message
             FROM job_executions WHERE job_id = ?1 ORDER BY attempt ASC, id ASC",
        )?;
        let executions = stmt
            .query_map(params![job_id], Self::row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }
}
