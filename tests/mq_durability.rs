//! The mother queue is meant to survive a crashed worker: a job enqueued by
//! one process must be leasable by another process reopening the same
//! on-disk database file, and a lease that's never acked stays claimed until
//! something reaps it. `rusqlite::Connection::open_in_memory` can't exercise
//! that - these tests open the same file path twice instead.

use historian::mq::MotherQueue;
use historian::store;
use serde_json::json;

#[test]
fn a_job_enqueued_by_one_connection_is_leasable_by_another() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mother_queue.db");

    let enqueue_pool = store::open_pool(&db_path).unwrap();
    let enqueue_conn = enqueue_pool.get().unwrap();
    store::mq::ensure_schema(&enqueue_conn).unwrap();
    let id = MotherQueue::new(&enqueue_conn)
        .enqueue("default", "noop", &json!({"users": ["root"]}), 100, 3)
        .unwrap();
    drop(enqueue_conn);
    drop(enqueue_pool);

    let worker_pool = store::open_pool(&db_path).unwrap();
    let worker_conn = worker_pool.get().unwrap();
    let mut mq = MotherQueue::new(&worker_conn);
    let job = mq.lease_one("default", "worker-a").unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.payload["users"][0], "root");

    mq.ack(&job.id).unwrap();
}

#[test]
fn reap_expired_leases_only_touches_stale_running_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mother_queue.db");

    let pool = store::open_pool(&db_path).unwrap();
    let conn = pool.get().unwrap();
    store::mq::ensure_schema(&conn).unwrap();

    let mut mq = MotherQueue::new(&conn);
    let crashed = mq.enqueue("default", "noop", &json!({}), 100, 3).unwrap();
    let healthy = mq.enqueue("default", "noop", &json!({}), 100, 3).unwrap();

    // Lease both with a lease window that's already expired for one of them.
    mq.lease_one_for("default", "worker-a", -10).unwrap();
    mq.lease_one_for("default", "worker-a", 3600).unwrap();

    let reaped = mq.reap_expired_leases("default").unwrap();
    assert_eq!(reaped, 1);

    let crashed_status: String = conn
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            [&crashed],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(crashed_status, "queued");

    let healthy_status: String = conn
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            [&healthy],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(healthy_status, "running");
}
