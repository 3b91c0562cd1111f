//! SQLite persistence for focus sessions.
//!
//! Owns the `sessions` table (permanent history) and a tiny `app_meta`
//! key/value table for the app-usage marker. Timer run-state is not stored
//! here; see [`crate::snapshot`].

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::warn;

use crate::error::{FocusError, Result};
use crate::store::{Session, SessionStore};

const APP_USED_KEY: &str = "has_used_app";

pub(crate) const SESSION_COLUMNS: &str =
    "id, duration_minutes, started_at, ended_at, completed, created_at";

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions ORDER BY started_at DESC, id DESC LIMIT ?1",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| FocusError::database("Failed to prepare sessions query", err))?;
            let rows = stmt
                .query_map(params![limit as i64], session_from_row)
                .map_err(|err| FocusError::database("Failed to query sessions", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(
                    row.map_err(|err| FocusError::database("Failed to decode session row", err))?,
                );
            }
            Ok(sessions)
        })
    }

    /// Sessions that have not reached a terminal state.
    pub fn active_sessions(&self) -> Result<Vec<Session>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE ended_at IS NULL ORDER BY started_at ASC, id ASC",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| FocusError::database("Failed to prepare active query", err))?;
            let rows = stmt
                .query_map([], session_from_row)
                .map_err(|err| FocusError::database("Failed to query active sessions", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(
                    row.map_err(|err| FocusError::database("Failed to decode session row", err))?,
                );
            }
            Ok(sessions)
        })
    }

    pub fn clear_sessions(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM sessions", [])
                .map_err(|err| FocusError::database("Failed to clear sessions", err))?;
            Ok(())
        })
    }

    pub fn has_used_app(&self) -> Result<bool> {
        self.with_connection(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM app_meta WHERE key = ?1",
                    params![APP_USED_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| FocusError::database("Failed to read app usage marker", err))?;
            Ok(value.as_deref() == Some("true"))
        })
    }

    pub fn mark_app_used(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO app_meta (key, value) VALUES (?1, 'true') \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![APP_USED_KEY],
            )
            .map_err(|err| FocusError::database("Failed to write app usage marker", err))?;
            Ok(())
        })
    }

    fn set_terminal(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        completed: bool,
    ) -> Result<()> {
        let affected = self.with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET ended_at = ?1, completed = ?2 WHERE id = ?3",
                params![format_timestamp(ended_at), completed, session_id],
            )
            .map_err(|err| FocusError::database("Failed to update session", err))
        })?;

        if affected == 0 {
            warn!(session_id, completed, "No session row found to finalize");
        }
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    duration_minutes INTEGER NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    completed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
                 CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at);
                 CREATE TABLE IF NOT EXISTS app_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| FocusError::database("Failed to initialize schema", err))?;
            Ok(())
        })
    }

    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| FocusError::io("Failed to create data dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| FocusError::database("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| FocusError::database("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| FocusError::database("Failed to set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| FocusError::database("Failed to set busy_timeout", err))?;

        Ok(conn)
    }
}

impl SessionStore for Db {
    fn create(&self, duration_minutes: u32, started_at: DateTime<Utc>) -> Result<i64> {
        self.with_connection(|conn| {
            let stamp = format_timestamp(started_at);
            conn.execute(
                "INSERT INTO sessions (duration_minutes, started_at, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![duration_minutes, stamp, stamp],
            )
            .map_err(|err| FocusError::database("Failed to insert session", err))?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn complete(&self, session_id: i64, ended_at: DateTime<Utc>) -> Result<()> {
        self.set_terminal(session_id, ended_at, true)
    }

    fn cancel(&self, session_id: i64, ended_at: DateTime<Utc>) -> Result<()> {
        self.set_terminal(session_id, ended_at, false)
    }

    fn delete(&self, session_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
                .map_err(|err| FocusError::database("Failed to delete session", err))?;
            Ok(())
        })
    }

    fn get(&self, session_id: i64) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
            conn.query_row(&sql, params![session_id], session_from_row)
                .optional()
                .map_err(|err| FocusError::database("Failed to query session", err))
        })
    }
}

/// Timestamps are stored as RFC 3339 text with millisecond precision and a
/// `Z` suffix, so the first ten characters are always the UTC calendar date.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        duration_minutes: row.get(1)?,
        started_at: timestamp_column(row, 2)?,
        ended_at: match row.get::<_, Option<String>>(3)? {
            Some(raw) => Some(parse_timestamp(&raw, 3)?),
            None => None,
        },
        completed: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw, index)
}

fn parse_timestamp(raw: &str, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("parse timestamp")
            .with_timezone(&Utc)
    }

    fn temp_db() -> (tempfile::TempDir, Db) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("focusflow.db")).expect("db init");
        (temp_dir, db)
    }

    #[test]
    fn schema_includes_sessions_and_meta_tables() {
        let (_temp_dir, db) = temp_db();
        let tables = db
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                    .map_err(|err| FocusError::database("prepare", err))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|err| FocusError::database("query", err))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row.map_err(|err| FocusError::database("row", err))?);
                }
                Ok(names)
            })
            .expect("list tables");

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"app_meta".to_string()));
    }

    #[test]
    fn creates_non_terminal_session() {
        let (_temp_dir, db) = temp_db();
        let started = at("2026-01-30T09:00:00Z");

        let id = db.create(25, started).expect("create");
        let session = db.get(id).expect("get").expect("session exists");

        assert_eq!(session.duration_minutes, 25);
        assert_eq!(session.started_at, started);
        assert_eq!(session.created_at, started);
        assert_eq!(session.ended_at, None);
        assert!(!session.completed);
        assert!(!session.is_terminal());
    }

    #[test]
    fn assigns_unique_ids() {
        let (_temp_dir, db) = temp_db();
        let first = db.create(25, at("2026-01-30T09:00:00Z")).expect("first");
        let second = db.create(25, at("2026-01-30T09:25:00Z")).expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn complete_and_cancel_set_terminal_state() {
        let (_temp_dir, db) = temp_db();
        let done = db.create(25, at("2026-01-30T09:00:00Z")).expect("create");
        let dropped = db.create(10, at("2026-01-30T10:00:00Z")).expect("create");

        db.complete(done, at("2026-01-30T09:25:00Z")).expect("complete");
        db.cancel(dropped, at("2026-01-30T10:03:00Z")).expect("cancel");

        let done = db.get(done).expect("get").expect("exists");
        assert!(done.completed);
        assert_eq!(done.ended_at, Some(at("2026-01-30T09:25:00Z")));

        let dropped = db.get(dropped).expect("get").expect("exists");
        assert!(!dropped.completed);
        assert_eq!(dropped.ended_at, Some(at("2026-01-30T10:03:00Z")));
    }

    #[test]
    fn finalizing_missing_session_is_not_an_error() {
        let (_temp_dir, db) = temp_db();
        db.complete(999, at("2026-01-30T09:25:00Z"))
            .expect("complete missing");
    }

    #[test]
    fn deletes_and_lists_sessions() {
        let (_temp_dir, db) = temp_db();
        let older = db.create(25, at("2026-01-29T09:00:00Z")).expect("create");
        let newer = db.create(45, at("2026-01-30T09:00:00Z")).expect("create");

        let listed = db.list_sessions(10).expect("list");
        assert_eq!(
            listed.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![newer, older]
        );

        db.delete(older).expect("delete");
        assert!(db.get(older).expect("get").is_none());
        assert_eq!(db.list_sessions(10).expect("list").len(), 1);

        db.clear_sessions().expect("clear");
        assert!(db.list_sessions(10).expect("list").is_empty());
    }

    #[test]
    fn active_sessions_excludes_terminal_rows() {
        let (_temp_dir, db) = temp_db();
        let done = db.create(25, at("2026-01-30T09:00:00Z")).expect("create");
        let open = db.create(25, at("2026-01-30T09:25:00Z")).expect("create");
        db.complete(done, at("2026-01-30T09:25:00Z")).expect("complete");

        let active = db.active_sessions().expect("active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open);
    }

    #[test]
    fn app_usage_marker_round_trips() {
        let (_temp_dir, db) = temp_db();
        assert!(!db.has_used_app().expect("read marker"));
        db.mark_app_used().expect("mark");
        db.mark_app_used().expect("mark twice");
        assert!(db.has_used_app().expect("read marker"));
    }
}
