//! Embedded SQL storage: one independent database file per logical store,
//! each a pooled `rusqlite::Connection` with WAL journaling, `synchronous
//! = NORMAL`, and a 5-second busy-timeout. Schemas are created on first
//! touch with `CREATE TABLE IF NOT EXISTS` and migrated additively -
//! columns are never dropped or renamed (spec.md §4.1).

pub mod ai_meta;
pub mod human_notes;
pub mod kb;
pub mod mq;
pub mod search_cache;

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

/// Opens (creating parent directories as needed) a pooled connection to a
/// SQLite database file with the performance pragmas every store in this
/// crate relies on, matching `LifestatsProcessor::init_schema`'s pragma
/// block.
pub fn open_pool(path: &Path) -> StoreResult<Pool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(())
    });

    r2d2::Pool::new(manager).map_err(StoreError::from)
}

/// True if `table` already has a column named `column` (introspection guard
/// for additive migrations, per spec.md §4.1 and §9 "Schema drift").
pub fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?1");
    let count: i64 = conn.query_row(&sql, [column], |row| row.get(0))?;
    Ok(count > 0)
}

/// Adds `column` to `table` with the given SQL type/default fragment if it
/// is not already present. Idempotent: safe to call on every startup.
pub fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<()> {
    if !has_column(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    }
    Ok(())
}

/// RFC3339-ish timestamp with millisecond precision, matching `mq.py`'s
/// `now_iso()` format (`...Z` suffix, no `+00:00`).
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// `now_iso()` offset `seconds` into the future - used for lease expiry and
/// retry `run_after` pushes.
pub fn iso_after(seconds: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(seconds))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// `datetime('now')`-shaped local-less UTC timestamp, matching the Python
/// scripts' `now()` helper (`"%Y-%m-%d %H:%M:%S"`) used for `commands`,
/// `command_ai`, `job_runs`, etc.
pub fn now_sql() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
