use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};
use tracing::info;

/// Offset added to every schema version stored in `PRAGMA user_version`, so a
/// database that was never initialized by us (user_version 0) is never
/// mistaken for a valid one.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_sql(declared: &str) -> Option<&'static SqlType> {
        match declared {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            "BLOB" => Some(&SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
}

fn strip_leading_and_trailing_parentheses<S: AsRef<str>>(s: S) -> String {
    let s = s.as_ref();
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

impl Table {
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut definition = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    definition.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    definition.push_str(" NOT NULL");
                }
                if column.is_unique {
                    definition.push_str(" UNIQUE");
                }
                if let Some(default_value) = column.default_value {
                    definition.push_str(&format!(" DEFAULT {}", default_value));
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({});", self.name, columns)
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])?;
        for (index_name, indexed_columns) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, indexed_columns
                ),
                params![],
            )?;
        }
        Ok(())
    }

    /// Reads the column layout SQLite reports for this table.
    fn actual_columns(&self, conn: &Connection) -> Result<Vec<Column<'static, String>>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let columns = stmt
            .query_map(params![], |row| {
                let declared: String = row.get(2)?;
                let sql_type = SqlType::from_sql(&declared).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, declared.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                    is_unique: false,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let actual_columns = self
            .actual_columns(conn)
            .with_context(|| format!("Error reading columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found column names: {}, expected: {}",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            // SQLite may report defaults wrapped in parentheses
            if actual
                .default_value
                .as_ref()
                .map(strip_leading_and_trailing_parentheses)
                != expected
                    .default_value
                    .map(strip_leading_and_trailing_parentheses)
            {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
        }

        for (index_name, _) in self.indices {
            let index_exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !index_exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        write_schema_version(conn, self.version)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Returns the schema version stored in the database, without the base offset.
pub fn read_schema_version(conn: &Connection) -> Result<i64> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(raw_version - BASE_DB_VERSION as i64)
}

fn write_schema_version(conn: &Connection, version: usize) -> Result<()> {
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + version),
        [],
    )?;
    Ok(())
}

/// Brings `conn` to the latest schema in `schemas`.
///
/// A fresh database gets the latest schema created directly. An existing one
/// is validated against the schema matching its stored version, then every
/// newer migration runs inside a single transaction.
pub fn prepare_database(
    conn: &mut Connection,
    schemas: &'static [VersionedSchema],
    db_label: &str,
    is_new_db: bool,
) -> Result<usize> {
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    let latest = schemas
        .last()
        .with_context(|| format!("No schemas defined for {} database", db_label))?;

    if is_new_db {
        info!(
            "Creating {} database with schema version {}",
            db_label, latest.version
        );
        latest.create(conn)?;
        return Ok(latest.version);
    }

    let db_version = read_schema_version(conn)?;
    if db_version < 1 {
        bail!(
            "{} database version {} is invalid (expected >= 1)",
            db_label,
            db_version
        );
    }
    let db_version = db_version as usize;
    if db_version > latest.version {
        bail!(
            "{} database version {} is too new (max supported: {})",
            db_label,
            db_version,
            latest.version
        );
    }

    let current = schemas
        .iter()
        .find(|s| s.version == db_version)
        .with_context(|| format!("Unknown {} database version {}", db_label, db_version))?;
    current.validate(conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            db_label, db_version
        )
    })?;

    if db_version < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            db_label, db_version, latest.version
        );
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > db_version) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Running {} database migration to version {}",
                    db_label, schema.version
                );
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
        }
        write_schema_version(&tx, latest.version)?;
        tx.commit()?;
    }

    Ok(latest.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTES_V1: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
        ],
        indices: &[("idx_notes_body", "body")],
    };

    const NOTES_V2: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("body", &SqlType::Text, non_null = true),
            sqlite_column!(
                "pinned",
                &SqlType::Integer,
                non_null = true,
                default_value = Some("0")
            ),
        ],
        indices: &[("idx_notes_body", "body")],
    };

    fn add_pinned_column(conn: &Connection) -> Result<()> {
        conn.execute(
            "ALTER TABLE notes ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        Ok(())
    }

    static NOTES_SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 1,
            tables: &[NOTES_V1],
            migration: None,
        },
        VersionedSchema {
            version: 2,
            tables: &[NOTES_V2],
            migration: Some(add_pinned_column),
        },
    ];

    #[test]
    fn create_sql_includes_constraints() {
        let sql = NOTES_V2.create_sql();
        assert_eq!(
            sql,
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, pinned INTEGER NOT NULL DEFAULT 0);"
        );
    }

    #[test]
    fn created_schema_validates_and_stores_version() {
        let conn = Connection::open_in_memory().unwrap();
        NOTES_SCHEMAS[1].create(&conn).unwrap();

        NOTES_SCHEMAS[1].validate(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn validate_detects_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        NOTES_SCHEMAS[0].create(&conn).unwrap();

        let err = NOTES_SCHEMAS[1].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("has 2 columns, expected 3"));
    }

    #[test]
    fn validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
            [],
        )
        .unwrap();

        let err = NOTES_SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_notes_body"));
    }

    #[test]
    fn validate_detects_type_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body BLOB NOT NULL)",
            [],
        )
        .unwrap();

        let err = NOTES_SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("type mismatch"));
    }

    #[test]
    fn prepare_database_migrates_forward() {
        let mut conn = Connection::open_in_memory().unwrap();
        NOTES_SCHEMAS[0].create(&conn).unwrap();
        conn.execute("INSERT INTO notes (body) VALUES ('hello')", [])
            .unwrap();

        let version = prepare_database(&mut conn, NOTES_SCHEMAS, "notes", false).unwrap();

        assert_eq!(version, 2);
        assert_eq!(read_schema_version(&conn).unwrap(), 2);
        NOTES_SCHEMAS[1].validate(&conn).unwrap();
        let pinned: i64 = conn
            .query_row("SELECT pinned FROM notes WHERE body = 'hello'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(pinned, 0);
    }

    #[test]
    fn prepare_database_rejects_uninitialized_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        let err = prepare_database(&mut conn, NOTES_SCHEMAS, "notes", false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("is invalid"));
    }

    #[test]
    fn prepare_database_rejects_newer_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        NOTES_SCHEMAS[1].create(&conn).unwrap();
        write_schema_version(&conn, 7).unwrap();

        let err = prepare_database(&mut conn, NOTES_SCHEMAS, "notes", false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("too new"));
    }
}
