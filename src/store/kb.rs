//! KBDB: `commands`, `base_commands`, `command_ai`, `command_search`,
//! `enrich_queue`.

use rusqlite::{params, Connection, OptionalExtension};

use super::now_sql;
use crate::error::StoreResult;

pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS base_commands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            base_cmd TEXT NOT NULL UNIQUE
         );

         CREATE TABLE IF NOT EXISTS commands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host TEXT NOT NULL,
            full_cmd TEXT NOT NULL UNIQUE,
            base_command_id INTEGER REFERENCES base_commands(id),
            seen_count INTEGER NOT NULL DEFAULT 1,
            first_seen TEXT DEFAULT (datetime('now')),
            last_seen TEXT DEFAULT (datetime('now'))
         );
         CREATE INDEX IF NOT EXISTS idx_commands_base ON commands(base_command_id);

         CREATE TABLE IF NOT EXISTS command_ai (
            cmd_id INTEGER PRIMARY KEY REFERENCES commands(id),
            status TEXT NOT NULL DEFAULT 'pending',
            known INTEGER,
            base_cmd TEXT,
            search_query TEXT,
            keywords_json TEXT,
            summary TEXT,
            result_json TEXT,
            model TEXT,
            prompt_version TEXT,
            error TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
         );
         CREATE INDEX IF NOT EXISTS idx_command_ai_status ON command_ai(status, updated_at);

         CREATE TABLE IF NOT EXISTS command_search (
            cmd_id INTEGER PRIMARY KEY REFERENCES commands(id),
            status TEXT NOT NULL DEFAULT 'pending',
            last_at TEXT,
            last_error TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_command_search_status ON command_search(status, last_at);

         CREATE TABLE IF NOT EXISTS enrich_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            \"ref\" TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 100,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now'))
         );
         CREATE UNIQUE INDEX IF NOT EXISTS idx_enrich_queue_kind_ref ON enrich_queue(kind, \"ref\");",
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewCommand<'a> {
    pub host: &'a str,
    pub full_cmd: &'a str,
    pub base_cmd: &'a str,
}

/// Result of [`upsert_command`]: the row's id either way, plus whether this
/// call created it (as opposed to bumping an existing row's `seen_count`).
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub cmd_id: i64,
    pub is_new: bool,
}

/// Inserts (or finds) `base_cmd`, then upserts the command row keyed on
/// `full_cmd`: a repeat observation bumps `seen_count`/`last_seen` instead of
/// creating a new row.
pub fn upsert_command(conn: &Connection, cmd: &NewCommand) -> StoreResult<UpsertOutcome> {
    conn.execute(
        "INSERT OR IGNORE INTO base_commands (base_cmd) VALUES (?1)",
        params![cmd.base_cmd],
    )?;
    let base_id: i64 = conn.query_row(
        "SELECT id FROM base_commands WHERE base_cmd = ?1",
        params![cmd.base_cmd],
        |row| row.get(0),
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM commands WHERE full_cmd = ?1",
            params![cmd.full_cmd],
            |row| row.get(0),
        )
        .optional()?;

    let now = now_sql();
    let (cmd_id, is_new) = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE commands SET seen_count = seen_count + 1, last_seen = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            (id, false)
        }
        None => {
            conn.execute(
                "INSERT INTO commands (host, full_cmd, base_command_id, seen_count, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                params![cmd.host, cmd.full_cmd, base_id, now],
            )?;
            (conn.last_insert_rowid(), true)
        }
    };

    if is_new {
        conn.execute(
            "INSERT OR IGNORE INTO command_ai (cmd_id, status) VALUES (?1, 'pending')",
            params![cmd_id],
        )?;
    }

    Ok(UpsertOutcome { cmd_id, is_new })
}

/// Insert-if-absent into `enrich_queue`, keyed uniquely on `(kind, ref)`.
pub fn enqueue_enrich(
    conn: &Connection,
    kind: &str,
    reference: &str,
    priority: i64,
) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO enrich_queue (kind, \"ref\", priority, status)
         VALUES (?1, ?2, ?3, 'pending')",
        params![kind, reference, priority],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PendingClassifyRow {
    pub cmd_id: i64,
    pub raw_command: String,
    pub base_cmd: String,
}

/// Next batch of commands awaiting classification, oldest-touched first
/// (matches `classify_bash_commands.py::fetch_pending`).
pub fn fetch_pending_classify(
    conn: &Connection,
    limit: i64,
) -> StoreResult<Vec<PendingClassifyRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.cmd_id, c.full_cmd, b.base_cmd
         FROM command_ai a
         JOIN commands c ON c.id = a.cmd_id
         JOIN base_commands b ON b.id = c.base_command_id
         WHERE a.status IN ('pending', 'error')
         ORDER BY a.updated_at ASC, c.id ASC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(PendingClassifyRow {
                cmd_id: row.get(0)?,
                raw_command: row.get(1)?,
                base_cmd: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

pub fn mark_classify_working(conn: &Connection, cmd_id: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE command_ai SET status = 'working', updated_at = ?2 WHERE cmd_id = ?1",
        params![cmd_id, now_sql()],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub known: bool,
    pub base_cmd: Option<String>,
    pub search_query: Option<String>,
    pub keywords_json: String,
    /// Derived from the LLM's `intent` field.
    pub summary: Option<String>,
    /// The raw, validated classification JSON returned by the LLM.
    pub result_json: String,
    pub model: String,
    pub prompt_version: String,
}

pub fn mark_classify_done(
    conn: &Connection,
    cmd_id: i64,
    result: &ClassifyResult,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE command_ai SET status='done', known=?2, base_cmd=?3, search_query=?4,
                keywords_json=?5, summary=?6, result_json=?7, model=?8, prompt_version=?9,
                error=NULL, updated_at=?10
         WHERE cmd_id=?1",
        params![
            cmd_id,
            result.known as i64,
            result.base_cmd,
            result.search_query,
            result.keywords_json,
            result.summary,
            result.result_json,
            result.model,
            result.prompt_version,
            now_sql(),
        ],
    )?;
    Ok(())
}

/// Marks a classification attempt as failed. Matches the lifecycle
/// `pending → working → done|error`: a failure lands in `error`, not back in
/// `pending` - `fetch_pending_classify` already reconsiders `error` rows on
/// the next run, so no separate retry state is needed.
pub fn mark_classify_error(conn: &Connection, cmd_id: i64, error: &str) -> StoreResult<()> {
    let truncated = crate::util::truncate_utf8_safe(error, 500);
    conn.execute(
        "UPDATE command_ai SET status='error', error=?2, updated_at=?3 WHERE cmd_id=?1",
        params![cmd_id, truncated, now_sql()],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SearchSeedRow {
    pub cmd_id: i64,
    pub search_query: String,
}

/// Seeds `command_search` from every `command_ai` row that finished
/// classification `known` with a non-empty `search_query`, leaving rows
/// already present untouched (`INSERT OR IGNORE`).
pub fn seed_search_rows(conn: &Connection) -> StoreResult<i64> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO command_search (cmd_id, status)
         SELECT cmd_id, 'pending' FROM command_ai
         WHERE status = 'done' AND known = 1
           AND search_query IS NOT NULL AND TRIM(search_query) != ''",
        [],
    )?;
    Ok(changed as i64)
}

pub fn fetch_pending_search(conn: &Connection, limit: i64) -> StoreResult<Vec<SearchSeedRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.cmd_id, a.search_query
         FROM command_search s
         JOIN command_ai a ON a.cmd_id = s.cmd_id
         WHERE s.status = 'pending'
         ORDER BY COALESCE(s.last_at, '') ASC, s.cmd_id ASC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(SearchSeedRow {
                cmd_id: row.get(0)?,
                search_query: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(rows)
}

pub fn mark_search(
    conn: &Connection,
    cmd_id: i64,
    status: &str,
    last_error: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE command_search SET status=?2, last_at=?3, last_error=?4 WHERE cmd_id=?1",
        params![cmd_id, status, now_sql(), last_error],
    )?;
    Ok(())
}

pub fn search_seed_count(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM command_search WHERE status = 'pending'",
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
    fn upsert_is_idempotent_on_full_cmd_and_bumps_seen_count() {
        let conn = mem();
        let cmd = NewCommand {
            host: "box1",
            full_cmd: "ls -la",
            base_cmd: "ls",
        };
        let first = upsert_command(&conn, &cmd).unwrap();
        assert!(first.is_new);
        let second = upsert_command(&conn, &cmd).unwrap();
        assert!(!second.is_new);
        assert_eq!(first.cmd_id, second.cmd_id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let seen_count: i64 = conn
            .query_row("SELECT seen_count FROM commands WHERE id = ?1", [first.cmd_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(seen_count, 2);
    }

    #[test]
    fn classify_lifecycle() {
        let conn = mem();
        let cmd_id = upsert_command(
            &conn,
            &NewCommand {
                host: "box1",
                full_cmd: "curl https://example.com",
                base_cmd: "curl",
            },
        )
        .unwrap()
        .cmd_id;

        let pending = fetch_pending_classify(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);

        mark_classify_working(&conn, cmd_id).unwrap();
        mark_classify_done(
            &conn,
            cmd_id,
            &ClassifyResult {
                known: true,
                base_cmd: Some("curl".into()),
                search_query: Some("curl usage".into()),
                keywords_json: "[\"curl\"]".into(),
                summary: Some("fetch a url".into()),
                result_json: "{\"known\":true}".into(),
                model: "llama3".into(),
                prompt_version: "v1".into(),
            },
        )
        .unwrap();

        let pending_after = fetch_pending_classify(&conn, 10).unwrap();
        assert!(pending_after.is_empty());

        let seeded = seed_search_rows(&conn).unwrap();
        assert_eq!(seeded, 1);
        let search_pending = fetch_pending_search(&conn, 10).unwrap();
        assert_eq!(search_pending.len(), 1);
        assert_eq!(search_pending[0].search_query, "curl usage");
    }

    #[test]
    fn classify_error_sets_error_status_and_truncates_message() {
        let conn = mem();
        let cmd_id = upsert_command(
            &conn,
            &NewCommand {
                host: "box1",
                full_cmd: "frobnitz --widget",
                base_cmd: "frobnitz",
            },
        )
        .unwrap()
        .cmd_id;

        let long_error = "x".repeat(600);
        mark_classify_error(&conn, cmd_id, &long_error).unwrap();

        let (status, error): (String, String) = conn
            .query_row(
                "SELECT status, error FROM command_ai WHERE cmd_id = ?1",
                [cmd_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "error");
        assert_eq!(error.len(), 500);

        // `error` rows are reconsidered on the next fetch, same as `pending`.
        let pending = fetch_pending_classify(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn enqueue_enrich_is_insert_if_absent() {
        let conn = mem();
        enqueue_enrich(&conn, "base", "curl", 50).unwrap();
        enqueue_enrich(&conn, "base", "curl", 50).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM enrich_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
