//! Queue-search: seeds `command_search` from freshly classified commands,
//! then walks pending rows and calls the search adapter for each, recording
//! only whether the call was successfully dispatched. Caching the raw
//! response into `search_cache_history` is the search service's job, not
//! this stage's - it only opens that database to ensure its schema exists
//! before the service needs it.

use std::time::Duration;

use rusqlite::Connection;

use crate::config::Config;
use crate::heartbeat;
use crate::lock::ScopedLock;
use crate::pipeline::StageReport;
use crate::search::{SearchClient, SearchOutcome};
use crate::store::{human_notes, kb, search_cache};

pub async fn run(cfg: &Config) -> anyhow::Result<StageReport> {
    let lock_path = cfg.paths.lock("queue_bash_searches");
    let Some(_lock) = ScopedLock::try_acquire(&lock_path)? else {
        return Ok(StageReport::locked());
    };

    let human_notes_pool = crate::store::open_pool(&cfg.paths.human_notes_db())?;
    let human_conn = human_notes_pool.get()?;
    human_notes::ensure_schema(&human_conn)?;

    let kb_pool = crate::store::open_pool(&cfg.paths.kb_db())?;
    let kb_conn = kb_pool.get()?;
    kb::ensure_schema(&kb_conn)?;

    let search_pool = crate::store::open_pool(&cfg.paths.search_cache_db())?;
    let search_conn = search_pool.get()?;
    search_cache::ensure_schema(&search_conn)?;

    heartbeat::job_start(&human_conn, "queue_bash_searches", "starting")?;
    let started = std::time::Instant::now();
    let result = run_batch(cfg, &kb_conn).await;
    let duration_ms = started.elapsed().as_millis() as i64;
    match &result {
        Ok(report) => heartbeat::job_finish(&human_conn, "queue_bash_searches", true, &report.to_string(), duration_ms)?,
        Err(e) => heartbeat::job_finish(&human_conn, "queue_bash_searches", false, &e.to_string(), duration_ms)?,
    }
    result
}

async fn run_batch(cfg: &Config, kb_conn: &Connection) -> anyhow::Result<StageReport> {
    let seeded = kb::seed_search_rows(kb_conn)?;
    let client = SearchClient::new(cfg.search_api_base.clone());

    let pending = kb::fetch_pending_search(kb_conn, cfg.search_batch as i64)?;
    let mut sent = 0i64;
    let mut stayed_pending = 0i64;
    let mut failed = 0i64;

    for (i, row) in pending.iter().enumerate() {
        match client.query(&row.search_query).await {
            Ok(SearchOutcome::Ok { .. }) => {
                kb::mark_search(kb_conn, row.cmd_id, "sent", None)?;
                sent += 1;
            }
            Ok(SearchOutcome::NoResults(msg)) => {
                kb::mark_search(kb_conn, row.cmd_id, "pending", Some(&format!("no_results: {msg}")))?;
                stayed_pending += 1;
            }
            Ok(SearchOutcome::NoUrls) => {
                kb::mark_search(kb_conn, row.cmd_id, "pending", Some("no_urls"))?;
                stayed_pending += 1;
            }
            Err(e) => {
                kb::mark_search(kb_conn, row.cmd_id, "error", Some(&e.to_string()))?;
                failed += 1;
            }
        }

        if i + 1 < pending.len() && cfg.search_sleep_secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(cfg.search_sleep_secs)).await;
        }
    }

    Ok(StageReport {
        processed: sent,
        skipped_locked: false,
        detail: format!(
            "seeded {seeded}, sent {sent}, pending {stayed_pending}, failed {failed} of {} fetched",
            pending.len()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kb::{ensure_schema, upsert_command, NewCommand, ClassifyResult};

    #[test]
    fn seeding_is_driven_entirely_by_command_ai_rows() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let cmd_id = upsert_command(
            &conn,
            &NewCommand {
                host: "box",
                full_cmd: "curl https://x",
                base_cmd: "curl",
            },
        )
        .unwrap()
        .cmd_id;

        let seeded_before_classify = kb::seed_search_rows(&conn).unwrap();
        assert_eq!(seeded_before_classify, 0);

        kb::mark_classify_done(
            &conn,
            cmd_id,
            &ClassifyResult {
                known: true,
                base_cmd: Some("curl".to_string()),
                search_query: Some("curl usage".to_string()),
                keywords_json: "[]".to_string(),
                summary: Some("fetch a url".to_string()),
                result_json: "{}".to_string(),
                model: "llama3".to_string(),
                prompt_version: "v1".to_string(),
            },
        )
        .unwrap();

        let seeded_after_classify = kb::seed_search_rows(&conn).unwrap();
        assert_eq!(seeded_after_classify, 1);
    }
}
