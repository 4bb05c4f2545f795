//! HumanNotesDB: `notes`, `history_state`, `job_runs`.

use rusqlite::{params, Connection, OptionalExtension};

use super::{add_column_if_missing, now_sql};
use crate::error::StoreResult;

pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            notes_type TEXT NOT NULL,
            topic TEXT,
            node TEXT,
            path TEXT,
            version TEXT,
            ts TEXT,
            note TEXT NOT NULL,
            parent_id INTEGER DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
         );
         CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);
         CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at DESC);

         CREATE TABLE IF NOT EXISTS history_state (
            host TEXT NOT NULL,
            path TEXT NOT NULL,
            inode TEXT,
            last_line INTEGER DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY (host, path)
         );

         CREATE TABLE IF NOT EXISTS job_runs (
            job TEXT PRIMARY KEY,
            last_start TEXT,
            last_ok TEXT,
            last_status TEXT,
            last_message TEXT,
            last_duration_ms INTEGER
         );

         CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT
         );",
    )?;

    // `node`/`path`/`version`/`ts` are the extended notes shape (spec.md §9
    // "Schema drift"); guarded additive adds so an older notes table still
    // upgrades cleanly.
    add_column_if_missing(conn, "notes", "node", "TEXT")?;
    add_column_if_missing(conn, "notes", "path", "TEXT")?;
    add_column_if_missing(conn, "notes", "version", "TEXT")?;
    add_column_if_missing(conn, "notes", "ts", "TEXT")?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct HistoryWatermark {
    pub inode: String,
    pub last_line: i64,
}

pub fn load_history_state(
    conn: &Connection,
    host: &str,
    path: &str,
) -> StoreResult<HistoryWatermark> {
    let row = conn
        .query_row(
            "SELECT COALESCE(inode,''), COALESCE(last_line,0) FROM history_state WHERE host=?1 AND path=?2",
            params![host, path],
            |row| {
                Ok(HistoryWatermark {
                    inode: row.get(0)?,
                    last_line: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or(HistoryWatermark {
        inode: String::new(),
        last_line: 0,
    }))
}

pub fn save_history_state(
    conn: &Connection,
    host: &str,
    path: &str,
    inode: &str,
    last_line: i64,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO history_state(host, path, inode, last_line, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(host, path) DO UPDATE SET
           inode=excluded.inode,
           last_line=excluded.last_line,
           updated_at=excluded.updated_at",
        params![host, path, inode, last_line, now_sql()],
    )?;
    Ok(())
}

/// Insert a new root-level note (`parent_id = 0`) and return its id.
pub fn insert_note(
    conn: &Connection,
    notes_type: &str,
    topic: &str,
    note: &str,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO notes (notes_type, topic, note, parent_id) VALUES (?1, ?2, ?3, 0)",
        params![notes_type, topic, note],
    )?;
    Ok(conn.last_insert_rowid())
}

/// True if any `notes.note` already contains the given marker substring -
/// used by search-summarize to skip rows already backfilled by hand.
pub fn note_contains(conn: &Connection, marker: &str) -> StoreResult<bool> {
    let pattern = format!("%{marker}%");
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM notes WHERE note LIKE ?1 LIMIT 1",
            params![pattern],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[derive(Debug, Clone)]
pub struct NoteRow {
    pub id: i64,
    pub parent_id: i64,
    pub notes_type: String,
    pub topic: String,
    pub note: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Loads up to `limit` notes with `id > since_id`, newest-first then
/// reversed so a small limit still reaches recent edits while processing
/// stays oldest-to-newest (matches `ai_notes.py::load_notes`).
pub fn load_notes_since(conn: &Connection, since_id: i64, limit: i64) -> StoreResult<Vec<NoteRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, notes_type, COALESCE(topic,''), note,
                COALESCE(created_at,''), COALESCE(updated_at,'')
         FROM notes WHERE id > ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let mut rows: Vec<NoteRow> = stmt
        .query_map(params![since_id, limit], |row| {
            Ok(NoteRow {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                notes_type: row.get(2)?,
                topic: row.get(3)?,
                note: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    rows.reverse();
    Ok(rows)
}

pub fn max_note_id(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("SELECT COALESCE(MAX(id), 0) FROM notes", [], |row| row.get(0))?)
}
