//! SQLite schema definitions for the job queue database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Jobs
// =============================================================================

/// Timestamps are unix milliseconds.
const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("job_class", &SqlType::Text, non_null = true),
        sqlite_column!("queue_name", &SqlType::Text, non_null = true),
        sqlite_column!("arguments", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "executions",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("max_attempts", &SqlType::Integer, non_null = true),
        sqlite_column!("enqueued_at", &SqlType::Integer, non_null = true),
        sqlite_column!("scheduled_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_status_scheduled", "status, scheduled_at"),
        ("idx_jobs_queue_name", "queue_name"),
    ],
};

// =============================================================================
// Version 2 - Execution history
// =============================================================================

const JOB_EXECUTIONS_TABLE_V2: Table = Table {
    name: "job_executions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("attempt", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[("idx_job_executions_job_id", "job_id")],
};

/// Migration from version 1 to version 2: add job_executions table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_EXECUTIONS_TABLE_V2.create(conn)
}

// =============================================================================
// Version 3 - Claim ownership
// =============================================================================

/// Running jobs carry the id of the worker that claimed them and the last time
/// that worker reported being alive.
const JOBS_TABLE_V3: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true), // UUID
        sqlite_column!("job_class", &SqlType::Text, non_null = true),
        sqlite_column!("queue_name", &SqlType::Text, non_null = true),
        sqlite_column!("arguments", &SqlType::Text, non_null = true), // JSON array
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "executions",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("max_attempts", &SqlType::Integer, non_null = true),
        sqlite_column!("enqueued_at", &SqlType::Integer, non_null = true),
        sqlite_column!("scheduled_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("locked_by", &SqlType::Text),
        sqlite_column!("heartbeat_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_jobs_status_scheduled", "status, scheduled_at"),
        ("idx_jobs_queue_name", "queue_name"),
    ],
};

/// Migration from version 2 to version 3: add claim ownership columns.
/// Jobs already running keep a NULL heartbeat and count as stale.
fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE jobs ADD COLUMN locked_by TEXT", [])?;
    conn.execute("ALTER TABLE jobs ADD COLUMN heartbeat_at INTEGER", [])?;
    Ok(())
}

pub static JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOBS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[JOBS_TABLE_V1, JOB_EXECUTIONS_TABLE_V2],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[JOBS_TABLE_V3, JOB_EXECUTIONS_TABLE_V2],
        migration: Some(migrate_v2_to_v3),
    },
];
