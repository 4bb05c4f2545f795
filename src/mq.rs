//! The mother queue: a general-purpose durable job queue any stage (or an
//! external caller, via the `enqueue` subcommand) can push work onto, and
//! the worker leases from. Mirrors `mq.py`'s `MotherQueue` exactly,
//! including its `BEGIN IMMEDIATE` lease transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MqError, MqResult, StoreError};
use crate::store::{iso_after, now_iso};

const DEFAULT_LEASE_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: Value,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
}

pub struct MotherQueue<'a> {
    conn: &'a Connection,
}

fn sql<T>(r: rusqlite::Result<T>) -> MqResult<T> {
    r.map_err(|e| MqError::Store(StoreError::from(e)))
}

impl<'a> MotherQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Adds a job to `queue`, returning its generated id. `run_after`
    /// defaults to now (eligible immediately).
    pub fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: &Value,
        priority: i64,
        max_attempts: i64,
    ) -> MqResult<String> {
        let id = Uuid::new_v4().to_string();
        let payload_json = serde_json::to_string(payload)?;
        let now = now_iso();
        sql(self.conn.execute(
            "INSERT INTO jobs (id, queue, name, payload_json, status, priority, run_after,
                                attempts, max_attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6, 0, ?7, ?6, ?6)",
            params![id, queue, name, payload_json, priority, now, max_attempts],
        ))?;
        Ok(id)
    }

    /// Atomically claims the single highest-priority, oldest eligible
    /// queued job on `queue` and marks it `running` under `locked_by`,
    /// leased for the default lease window. Uses `BEGIN IMMEDIATE` so two
    /// workers racing on the same queue never both win the same row.
    pub fn lease_one(&mut self, queue: &str, locked_by: &str) -> MqResult<Option<Job>> {
        self.lease_one_for(queue, locked_by, DEFAULT_LEASE_SECONDS)
    }

    pub fn lease_one_for(
        &mut self,
        queue: &str,
        locked_by: &str,
        lease_seconds: i64,
    ) -> MqResult<Option<Job>> {
        sql(self.conn.execute_batch("BEGIN IMMEDIATE"))?;

        let picked = self
            .conn
            .query_row(
                "SELECT id FROM jobs
                 WHERE queue = ?1 AND status = 'queued' AND run_after <= ?2
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1",
                params![queue, now_iso()],
                |row| row.get::<_, String>(0),
            )
            .optional();

        let picked = match picked {
            Ok(v) => v,
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(MqError::Store(StoreError::from(e)));
            }
        };

        let Some(job_id) = picked else {
            sql(self.conn.execute_batch("COMMIT"))?;
            return Ok(None);
        };

        let locked_until = iso_after(lease_seconds);
        if let Err(e) = self.conn.execute(
            "UPDATE jobs SET status='running', locked_by=?2, locked_until=?3,
                    attempts=attempts+1, updated_at=?4
             WHERE id=?1",
            params![job_id, locked_by, locked_until, now_iso()],
        ) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(MqError::Store(StoreError::from(e)));
        }

        let job = match self.conn.query_row(
            "SELECT id, queue, name, payload_json, status, priority, attempts, max_attempts
             FROM jobs WHERE id = ?1",
            params![job_id],
            row_to_job,
        ) {
            Ok(job) => job,
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(MqError::Store(StoreError::from(e)));
            }
        };
        sql(self.conn.execute_batch("COMMIT"))?;
        Ok(Some(job))
    }

    pub fn ack(&self, job_id: &str) -> MqResult<()> {
        let changed = sql(self.conn.execute(
            "UPDATE jobs SET status='done', locked_by=NULL, locked_until=NULL, updated_at=?2
             WHERE id=?1",
            params![job_id, now_iso()],
        ))?;
        if changed == 0 {
            return Err(MqError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Marks `job_id` failed. If it has exhausted `max_attempts` it goes
    /// `dead`; otherwise it's requeued `queued` with a backoff of
    /// `retry_delay_seconds`. `error` is truncated to 4000 bytes.
    pub fn fail(&self, job_id: &str, error: &str, retry_delay_seconds: i64) -> MqResult<()> {
        let error = crate::util::truncate_utf8_safe(error, 4000);
        let row = sql(self
            .conn
            .query_row(
                "SELECT attempts, max_attempts FROM jobs WHERE id = ?1",
                params![job_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional())?;
        let Some((attempts, max_attempts)) = row else {
            return Err(MqError::NotFound(job_id.to_string()));
        };

        if attempts >= max_attempts {
            sql(self.conn.execute(
                "UPDATE jobs SET status='dead', locked_by=NULL, locked_until=NULL,
                        last_error=?2, updated_at=?3
                 WHERE id=?1",
                params![job_id, error, now_iso()],
            ))?;
        } else {
            sql(self.conn.execute(
                "UPDATE jobs SET status='queued', locked_by=NULL, locked_until=NULL,
                        run_after=?2, last_error=?3, updated_at=?4
                 WHERE id=?1",
                params![job_id, iso_after(retry_delay_seconds), error, now_iso()],
            ))?;
        }
        Ok(())
    }

    /// Requeues jobs whose lease expired without an `ack`/`fail` - a
    /// crashed worker never released them. Not called automatically by
    /// anything in this crate; exposed for an operator or external cron to
    /// invoke deliberately.
    pub fn reap_expired_leases(&self, queue: &str) -> MqResult<i64> {
        let changed = sql(self.conn.execute(
            "UPDATE jobs SET status='queued', locked_by=NULL, locked_until=NULL, updated_at=?2
             WHERE queue=?1 AND status='running' AND locked_until < ?2",
            params![queue, now_iso()],
        ))?;
        Ok(changed as i64)
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let payload_json: String = row.get(3)?;
    let payload: Value = serde_json::from_str(&payload_json).unwrap_or(Value::Null);
    Ok(Job {
        id: row.get(0)?,
        queue: row.get(1)?,
        name: row.get(2)?,
        payload,
        status: row.get(4)?,
        priority: row.get(5)?,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::store::mq::ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn enqueue_lease_ack_lifecycle() {
        let conn = mem();
        let mut mq = MotherQueue::new(&conn);

        let id = mq
            .enqueue("default", "noop", &json!({}), 100, 3)
            .unwrap();

        let job = mq.lease_one("default", "worker-1").unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, "running");
        assert_eq!(job.attempts, 1);

        assert!(mq.lease_one("default", "worker-2").unwrap().is_none());

        mq.ack(&id).unwrap();
        let status: String = conn
            .query_row("SELECT status FROM jobs WHERE id=?1", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "done");
    }

    #[test]
    fn fail_requeues_until_max_attempts_then_dies() {
        let conn = mem();
        let mut mq = MotherQueue::new(&conn);
        let id = mq
            .enqueue("default", "ingest_bash_history", &json!({}), 100, 2)
            .unwrap();

        mq.lease_one("default", "w1").unwrap().unwrap();
        mq.fail(&id, "boom", 0).unwrap();
        let status: String = conn
            .query_row("SELECT status FROM jobs WHERE id=?1", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "queued");

        mq.lease_one("default", "w1").unwrap().unwrap();
        mq.fail(&id, "boom again", 0).unwrap();
        let status: String = conn
            .query_row("SELECT status FROM jobs WHERE id=?1", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "dead");
    }

    #[test]
    fn priority_and_age_break_ties() {
        let conn = mem();
        let mut mq = MotherQueue::new(&conn);
        let low_priority = mq.enqueue("q", "a", &json!({}), 200, 3).unwrap();
        let high_priority = mq.enqueue("q", "b", &json!({}), 10, 3).unwrap();

        let job = mq.lease_one("q", "w").unwrap().unwrap();
        assert_eq!(job.id, high_priority);
        let job = mq.lease_one("q", "w").unwrap().unwrap();
        assert_eq!(job.id, low_priority);
    }
}
