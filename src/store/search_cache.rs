//! SearchCacheDB: `search_cache_history` — one row per searched query, with
//! the raw provider response and, once summarized, the AI-written notes.

use rusqlite::{params, Connection, OptionalExtension};

use super::add_column_if_missing;
use crate::error::StoreResult;

pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS search_cache_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            cmd_id INTEGER,
            response_json TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
         );
         CREATE INDEX IF NOT EXISTS idx_search_cache_cmd ON search_cache_history(cmd_id);",
    )?;

    // Added post-launch once the summarize stage needed somewhere to park
    // its output next to the raw response it was derived from.
    add_column_if_missing(conn, "search_cache_history", "top_urls", "TEXT")?;
    add_column_if_missing(conn, "search_cache_history", "ai_notes", "TEXT")?;

    Ok(())
}

/// Writes a captured search response. Not called by `queue_search` -
/// populating this table is the out-of-band search service's job; this
/// exists for that writer and for tests.
pub fn insert_search_result(
    conn: &Connection,
    query: &str,
    cmd_id: i64,
    response_json: &str,
    top_urls_json: &str,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO search_cache_history (query, cmd_id, response_json, top_urls)
         VALUES (?1, ?2, ?3, ?4)",
        params![query, cmd_id, response_json, top_urls_json],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone)]
pub struct PendingSummaryRow {
    pub id: i64,
    pub query: String,
    pub response_json: String,
    pub top_urls_json: Option<String>,
}

/// Rows whose `ai_notes` column is still unset, oldest id first - matches
/// `ai_search_summ.py::load_pending_searches`.
pub fn load_pending_summaries(
    conn: &Connection,
    since_id: i64,
    limit: i64,
) -> StoreResult<Vec<PendingSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, query, response_json, top_urls
         FROM search_cache_history
         WHERE id > ?1 AND (ai_notes IS NULL OR TRIM(ai_notes) = '')
         ORDER BY id ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![since_id, limit], |row| {
            Ok(PendingSummaryRow {
                id: row.get(0)?,
                query: row.get(1)?,
                response_json: row.get(2)?,
                top_urls_json: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

pub fn set_ai_notes(conn: &Connection, id: i64, ai_notes: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE search_cache_history SET ai_notes = ?2 WHERE id = ?1",
        params![id, ai_notes],
    )?;
    Ok(())
}

pub fn get_query(conn: &Connection, id: i64) -> StoreResult<Option<String>> {
    let row = conn
        .query_row(
            "SELECT query FROM search_cache_history WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_summary_excludes_already_summarized() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let id = insert_search_result(&conn, "how to rebase", 1, "{}", "[]").unwrap();
        let pending = load_pending_summaries(&conn, 0, 10).unwrap();
        assert_eq!(pending.len(), 1);

        set_ai_notes(&conn, id, "summary text").unwrap();
        let pending_after = load_pending_summaries(&conn, 0, 10).unwrap();
        assert!(pending_after.is_empty());
    }
}
