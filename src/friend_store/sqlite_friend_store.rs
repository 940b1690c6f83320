use super::models::{Friend, NewFriend};
use super::schema::FRIENDS_VERSIONED_SCHEMAS;
use super::FriendStore;
use crate::sqlite_persistence::prepare_database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct SqliteFriendStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFriendStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open friends database")?;
        if is_new_db {
            info!("Creating new friends database at {:?}", path);
        }
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        prepare_database(&mut conn, FRIENDS_VERSIONED_SCHEMAS, "friends", is_new_db)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        prepare_database(&mut conn, FRIENDS_VERSIONED_SCHEMAS, "friends", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    }

    fn row_to_friend(row: &rusqlite::Row) -> rusqlite::Result<Friend> {
        Ok(Friend {
            id: row.get("id")?,
            name: row.get::<_, Option<String>>("name")?.unwrap_or_default(),
            email: row.get::<_, Option<String>>("email")?.unwrap_or_default(),
            created_at: Self::parse_datetime(3, row.get("created_at")?)?,
            updated_at: Self::parse_datetime(4, row.get("updated_at")?)?,
        })
    }
}

impl FriendStore for SqliteFriendStore {
    fn create_friend(&self, new_friend: &NewFriend) -> Result<Friend> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let timestamp = Self::format_datetime(&now);

        conn.execute(
            "INSERT INTO friends (name, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![new_friend.name, new_friend.email, timestamp],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created friend {} ({})", id, new_friend.email);

        // Read back so the returned timestamps match the stored text exactly
        let friend = conn
            .query_row(
                "SELECT id, name, email, created_at, updated_at FROM friends WHERE id = ?1",
                params![id],
                Self::row_to_friend,
            )
            .context("Failed to read back inserted friend")?;
        Ok(friend)
    }

    fn get_friend(&self, id: i64) -> Result<Option<Friend>> {
        let conn = self.conn.lock().unwrap();
        let friend = conn
            .query_row(
                "SELECT id, name, email, created_at, updated_at FROM friends WHERE id = ?1",
                params![id],
                Self::row_to_friend,
            )
            .optional()?;
        Ok(friend)
    }

    fn list_friends(&self, limit: usize, offset: usize) -> Result<Vec<Friend>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, email, created_at, updated_at FROM friends
             ORDER BY id ASC LIMIT ?1 OFFSET ?2",
        )?;
        let friends = stmt
            .query_map(params![limit as i64, offset as i64], Self::row_to_friend)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(friends)
    }

    fn count_friends(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM friends", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn update_name(&self, id: i64, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let updated = conn.execute(
            "UPDATE friends SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now, id],
        )?;
        Ok(updated > 0)
    }

    fn delete_friend(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM friends WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
