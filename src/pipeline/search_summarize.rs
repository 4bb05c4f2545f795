//! Search-summarize: turns cached search results into a short human note,
//! written back into the shared notes table so it shows up alongside
//! hand-written notes rather than in a separate silo.

use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::Value;

use crate::config::Config;
use crate::heartbeat;
use crate::lock::ScopedLock;
use crate::llm::OllamaClient;
use crate::pipeline::StageReport;
use crate::store::{human_notes, search_cache};
use crate::templates;

const DEFAULT_SYSTEM_PROMPT: &str = "You summarize web search results for a personal shell-command knowledge base. Be concise and factual.";
const MAX_URLS_IN_PROMPT: usize = 15;

pub async fn run(cfg: &Config) -> anyhow::Result<StageReport> {
    let lock_path = cfg.paths.lock("ai_search_summ");
    let Some(_lock) = ScopedLock::try_acquire(&lock_path)? else {
        return Ok(StageReport::locked());
    };

    let human_notes_pool = crate::store::open_pool(&cfg.paths.human_notes_db())?;
    let human_conn = human_notes_pool.get()?;
    human_notes::ensure_schema(&human_conn)?;

    let search_pool = crate::store::open_pool(&cfg.paths.search_cache_db())?;
    let search_conn = search_pool.get()?;
    search_cache::ensure_schema(&search_conn)?;

    heartbeat::job_start(&human_conn, "ai_search_summ", "starting")?;
    let started = std::time::Instant::now();
    let result = summarize_batch(cfg, &human_conn, &search_conn).await;
    let duration_ms = started.elapsed().as_millis() as i64;
    match &result {
        Ok(report) => heartbeat::job_finish(&human_conn, "ai_search_summ", true, &report.to_string(), duration_ms)?,
        Err(e) => heartbeat::job_finish(&human_conn, "ai_search_summ", false, &e.to_string(), duration_ms)?,
    }
    result
}

async fn summarize_batch(
    cfg: &Config,
    human_conn: &Connection,
    search_conn: &Connection,
) -> anyhow::Result<StageReport> {
    let client = OllamaClient::new(
        cfg.ollama_url.clone(),
        cfg.ollama_model.clone(),
        std::time::Duration::from_secs(180),
    );

    let pending = search_cache::load_pending_summaries(search_conn, 0, 500)?;
    let mut summarized = 0i64;
    let mut skipped_existing = 0i64;

    for row in &pending {
        let marker = format!("search_cache_id: {}", row.id);
        if human_notes::note_contains(human_conn, &marker)? {
            search_cache::set_ai_notes(search_conn, row.id, "already noted")?;
            skipped_existing += 1;
            continue;
        }

        let top_urls: Vec<String> = row
            .top_urls_json
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default();

        let (system, user, temperature) = build_prompt(cfg, &row.query, &top_urls, &row.response_json);
        let summary = client.chat(&system, &user, temperature).await?;

        let note_body = format!("{marker}\nquery: {}\n\n{summary}", row.query);
        human_notes::insert_note(
            human_conn,
            "ai_generated",
            &format!("search: {}", row.query),
            &note_body,
        )?;
        search_cache::set_ai_notes(search_conn, row.id, &summary)?;
        summarized += 1;
    }

    Ok(StageReport {
        processed: summarized,
        skipped_locked: false,
        detail: format!(
            "{summarized} summarized, {skipped_existing} already noted of {} pending",
            pending.len()
        ),
    })
}

fn build_prompt(
    cfg: &Config,
    query: &str,
    top_urls: &[String],
    response_json: &str,
) -> (String, String, f64) {
    let mut vars = HashMap::new();
    vars.insert("query.text".to_string(), query.to_string());
    vars.insert("query.urls".to_string(), top_urls.join("\n"));

    if let Some(parts) =
        templates::render_named_template(&cfg.paths.ai_header_db(), "search_summary", &vars)
    {
        return (parts.system, parts.user, parts.temperature);
    }

    let urls_block = top_urls
        .iter()
        .take(MAX_URLS_IN_PROMPT)
        .map(|u| format!("- {u}"))
        .collect::<Vec<_>>()
        .join("\n");
    let pretty_response: Value = serde_json::from_str(response_json).unwrap_or(Value::Null);
    let user = format!(
        "Query: {query}\n\nTop URLs:\n{urls_block}\n\nRaw search response:\n{}",
        serde_json::to_string_pretty(&pretty_response).unwrap_or_default()
    );
    (DEFAULT_SYSTEM_PROMPT.to_string(), user, 0.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_used_when_no_template_db() {
        let cfg = Config::default();
        let (system, user, temperature) =
            build_prompt(&cfg, "how to rebase", &["https://git-scm.com".to_string()], "{}");
        assert_eq!(system, DEFAULT_SYSTEM_PROMPT);
        assert!(user.contains("how to rebase"));
        assert!(user.contains("git-scm.com"));
        assert_eq!(temperature, 0.2);
    }
}
