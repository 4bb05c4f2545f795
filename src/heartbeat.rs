//! `job_runs` heartbeat: every stage upserts a start row before it begins
//! work and a finish row when it's done, so `historian` (or an external
//! monitor) can answer "when did X last run, and did it succeed" without
//! parsing logs.

use rusqlite::{params, Connection};

use crate::error::StoreResult;
use crate::store::now_sql;

/// Call at the top of a stage, before any work happens. `message` is
/// truncated to 900 bytes, matching `_job_upsert_start`.
pub fn job_start(conn: &Connection, job: &str, message: &str) -> StoreResult<()> {
    let message = crate::util::truncate_utf8_safe(message, 900);
    conn.execute(
        "INSERT INTO job_runs (job, last_start, last_status, last_message)
         VALUES (?1, ?2, 'running', ?3)
         ON CONFLICT(job) DO UPDATE SET
            last_start=excluded.last_start,
            last_status=excluded.last_status,
            last_message=excluded.last_message",
        params![job, now_sql(), message],
    )?;
    Ok(())
}

/// Call when a stage finishes, successfully or not. `duration_ms` is
/// elapsed wall time since the matching `job_start` call.
pub fn job_finish(
    conn: &Connection,
    job: &str,
    ok: bool,
    message: &str,
    duration_ms: i64,
) -> StoreResult<()> {
    let message = crate::util::truncate_utf8_safe(message, 900);
    let status = if ok { "ok" } else { "error" };
    conn.execute(
        "INSERT INTO job_runs (job, last_ok, last_status, last_message, last_duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(job) DO UPDATE SET
            last_ok=excluded.last_ok,
            last_status=excluded.last_status,
            last_message=excluded.last_message,
            last_duration_ms=excluded.last_duration_ms",
        params![job, if ok { now_sql() } else { String::new() }, status, message, duration_ms],
    )?;
    Ok(())
}

/// Runs `body`, recording a start heartbeat before and a finish heartbeat
/// after regardless of outcome. The stage's own `anyhow::Result` is
/// returned unchanged.
pub fn with_heartbeat<T>(
    conn: &Connection,
    job: &str,
    start_message: &str,
    body: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    job_start(conn, job, start_message)?;
    let started = std::time::Instant::now();
    let result = body();
    let duration_ms = started.elapsed().as_millis() as i64;
    match &result {
        Ok(_) => job_finish(conn, job, true, "ok", duration_ms)?,
        Err(e) => job_finish(conn, job, false, &e.to_string(), duration_ms)?,
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::human_notes::ensure_schema;

    #[test]
    fn start_then_finish_updates_same_row() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        job_start(&conn, "ingest_bash_history", "starting").unwrap();
        job_finish(&conn, "ingest_bash_history", true, "ok: 10 rows", 42).unwrap();

        let (status, duration): (String, i64) = conn
            .query_row(
                "SELECT last_status, last_duration_ms FROM job_runs WHERE job=?1",
                params!["ingest_bash_history"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "ok");
        assert_eq!(duration, 42);
    }

    #[test]
    fn with_heartbeat_records_error_on_failure() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let result: anyhow::Result<()> =
            with_heartbeat(&conn, "classify_bash_commands", "starting", || {
                anyhow::bail!("ollama unreachable")
            });
        assert!(result.is_err());

        let status: String = conn
            .query_row(
                "SELECT last_status FROM job_runs WHERE job=?1",
                params!["classify_bash_commands"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "error");
    }
}
