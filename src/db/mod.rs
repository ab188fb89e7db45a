//! SQLite persistence.
//!
//! A single pool shared by the REST handlers and the scheduler loop. The
//! schema is created at startup; there is no separate migration tool. JSON
//! columns are stored as TEXT and decoded through the typed structs in
//! [`crate::model`].

mod resources;
mod tasks;

use std::str::FromStr;

use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

pub type DbResult<T> = Result<T, sqlx::Error>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS tags (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS application_tags (
    application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
    tag_id         INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS task_groups (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL DEFAULT '',
    kind  TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'Created',
    data  TEXT NOT NULL DEFAULT 'null'
);
CREATE TABLE IF NOT EXISTS tasks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL DEFAULT '',
    kind          TEXT NOT NULL DEFAULT '',
    addon         TEXT NOT NULL DEFAULT '',
    extensions    TEXT NOT NULL DEFAULT '[]',
    state         TEXT NOT NULL DEFAULT 'Created',
    locator       TEXT NOT NULL DEFAULT '',
    priority      INTEGER NOT NULL DEFAULT 0,
    policy        TEXT NOT NULL DEFAULT '[]',
    ttl           TEXT,
    data          TEXT NOT NULL DEFAULT 'null',
    application_id INTEGER,
    task_group_id  INTEGER REFERENCES task_groups(id) ON DELETE CASCADE,
    bucket_id      INTEGER,
    pod           TEXT NOT NULL DEFAULT '',
    started       TEXT,
    terminated    TEXT,
    canceled      INTEGER NOT NULL DEFAULT 0,
    retries       INTEGER NOT NULL DEFAULT 0,
    errors        TEXT NOT NULL DEFAULT '[]',
    events        TEXT NOT NULL DEFAULT '[]',
    attached      TEXT NOT NULL DEFAULT '[]',
    state_entered TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS tasks_state ON tasks(state);
CREATE TABLE IF NOT EXISTS task_reports (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id   INTEGER NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
    status    TEXT NOT NULL DEFAULT '',
    total     INTEGER NOT NULL DEFAULT 0,
    completed INTEGER NOT NULL DEFAULT 0,
    activity  TEXT NOT NULL DEFAULT '[]',
    errors    TEXT NOT NULL DEFAULT '[]',
    attached  TEXT NOT NULL DEFAULT '[]',
    result    TEXT
);
CREATE TABLE IF NOT EXISTS files (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS buckets (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL
);
"#;

/// Shared database handle.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating as needed) and ensure the schema.
    pub async fn connect(path: &str) -> DbResult<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode a JSON TEXT column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &SqliteRow, name: &str) -> DbResult<T> {
    let raw: String = row.try_get(name)?;
    serde_json::from_str(&raw).map_err(|source| sqlx::Error::ColumnDecode {
        index: name.to_string(),
        source: Box::new(source),
    })
}

/// Decode a nullable JSON TEXT column.
pub(crate) fn json_column_opt<T: DeserializeOwned>(
    row: &SqliteRow,
    name: &str,
) -> DbResult<Option<T>> {
    let raw: Option<String> = row.try_get(name)?;
    match raw {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| sqlx::Error::ColumnDecode {
                index: name.to_string(),
                source: Box::new(source),
            }),
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
