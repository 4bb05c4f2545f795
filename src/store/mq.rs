//! MQDB schema: the single `jobs` table backing the mother queue. Kept
//! separate from [`crate::mq`], which owns the queue semantics (leasing,
//! retry, dead-lettering) built on top of this schema.

use rusqlite::Connection;

use crate::error::StoreResult;

pub fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            name TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            priority INTEGER NOT NULL DEFAULT 100,
            run_after TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            locked_by TEXT,
            locked_until TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_error TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_jobs_pick ON jobs(queue, status, run_after, priority);
         CREATE INDEX IF NOT EXISTS idx_jobs_locked ON jobs(status, locked_until);
         CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs(updated_at);",
    )?;
    Ok(())
}
