//! AIMetaDB: `ai_note_meta` — structured metadata generated for each note,
//! keyed so a note is only ever re-summarized when its content actually
//! changes (`source_hash`).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreResult;

pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ai_note_meta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            note_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL DEFAULT 0,
            notes_type TEXT NOT NULL,
            topic TEXT,
            source_hash TEXT NOT NULL,
            model_name TEXT,
            meta_json TEXT NOT NULL,
            summary TEXT,
            tags_csv TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(note_id, source_hash)
         );
         CREATE INDEX IF NOT EXISTS idx_ai_note_meta_note ON ai_note_meta(note_id);",
    )?;
    Ok(())
}

pub struct NoteMeta<'a> {
    pub note_id: i64,
    pub parent_id: i64,
    pub notes_type: &'a str,
    pub topic: &'a str,
    pub source_hash: &'a str,
    pub model_name: &'a str,
    pub meta_json: &'a str,
    pub summary: &'a str,
    pub tags_csv: &'a str,
}

/// `(note_id, source_hash)` already has an entry iff the note's content
/// hasn't changed since it was last summarized (spec.md §4.5 idempotence).
pub fn already_done(conn: &Connection, note_id: i64, source_hash: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM ai_note_meta WHERE note_id = ?1 AND source_hash = ?2 LIMIT 1",
            params![note_id, source_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn upsert_meta(conn: &Connection, meta: &NoteMeta) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO ai_note_meta
            (note_id, parent_id, notes_type, topic, source_hash, model_name, meta_json, summary, tags_csv)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(note_id, source_hash) DO UPDATE SET
            parent_id=excluded.parent_id,
            notes_type=excluded.notes_type,
            topic=excluded.topic,
            model_name=excluded.model_name,
            meta_json=excluded.meta_json,
            summary=excluded.summary,
            tags_csv=excluded.tags_csv",
        params![
            meta.note_id,
            meta.parent_id,
            meta.notes_type,
            meta.topic,
            meta.source_hash,
            meta.model_name,
            meta.meta_json,
            meta.summary,
            meta.tags_csv,
        ],
    )?;
    Ok(())
}

/// Highest `note_id` this database has metadata for, used as the backtrack
/// anchor (`note_metadata::run`'s `start_from = max(0, last - backtrack)`).
pub fn last_processed_note_id(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(note_id), 0) FROM ai_note_meta",
        [],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn same_source_hash_is_idempotent() {
        let conn = mem();
        let meta = NoteMeta {
            note_id: 1,
            parent_id: 0,
            notes_type: "ai_generated",
            topic: "t",
            source_hash: "abc",
            model_name: "gpt-oss:latest",
            meta_json: "{}",
            summary: "s",
            tags_csv: "a,b",
        };
        assert!(!already_done(&conn, 1, "abc").unwrap());
        upsert_meta(&conn, &meta).unwrap();
        assert!(already_done(&conn, 1, "abc").unwrap());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ai_note_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn changed_hash_creates_a_new_row() {
        let conn = mem();
        let base = NoteMeta {
            note_id: 5,
            parent_id: 0,
            notes_type: "ai_generated",
            topic: "t",
            source_hash: "v1",
            model_name: "m",
            meta_json: "{}",
            summary: "s",
            tags_csv: "",
        };
        upsert_meta(&conn, &base).unwrap();
        upsert_meta(
            &conn,
            &NoteMeta {
                source_hash: "v2",
                ..base
            },
        )
        .unwrap();

        assert_eq!(last_processed_note_id(&conn).unwrap(), 5);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ai_note_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
