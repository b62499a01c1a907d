//! Schema and connection helpers shared by the three stores.
//!
//! - **Schema** — `init_schema` creates `users`, `professions` and
//!   `conversations` and stamps `PRAGMA user_version`.
//! - **Connection factory** — `open_conn` (WAL + foreign keys + busy timeout).
//! - **Timestamps** — `now_iso8601` with millisecond precision so turns
//!   written in the same second still sort correctly.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::AppError;

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes and add a migration step in `init_schema`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Create all tables and indexes if they do not exist yet.
///
/// `professions` carries `UNIQUE (user_id, profession_name)`: persona creation
/// relies on it for insert-if-absent. Both child tables cascade on user delete.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::Memory(format!("read user_version: {e}")))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS professions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            profession_name TEXT NOT NULL,
            prompt TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, profession_name)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
            persona_name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_user_persona
            ON conversations (user_id, persona_name, timestamp);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| AppError::Memory(format!("initialize schema: {e}")))
}

/// Open a SQLite connection to `db_path` and apply the standard pragmas.
///
/// - `journal_mode = WAL` — readers proceed alongside a writer.
/// - `foreign_keys = ON` — needed for the `ON DELETE CASCADE` clauses.
/// - `busy_timeout = 5000` — wait up to 5 s before returning `SQLITE_BUSY`.
pub(crate) fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Memory(format!("open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Memory(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Memory(format!("set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Memory(format!("set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Current UTC time, e.g. `"2026-10-16T12:00:00.123Z"`.
pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
