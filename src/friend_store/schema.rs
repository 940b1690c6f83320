//! SQLite schema definitions for the friends database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Friends
// =============================================================================

const FRIENDS_TABLE_V1: Table = Table {
    name: "friends",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

pub static FRIENDS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[FRIENDS_TABLE_V1],
    migration: None,
}];
