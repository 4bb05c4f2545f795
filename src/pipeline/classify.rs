//! Classification: asks the local LLM whether a base command is worth
//! looking up online and, if so, what to search for. Batches pending rows
//! so one run never holds the lock indefinitely.

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::heartbeat;
use crate::lock::ScopedLock;
use crate::llm::OllamaClient;
use crate::pipeline::StageReport;
use crate::store::{human_notes, kb};

const PROMPT_TEMPLATE: &str = r#"You are classifying a shell command for a personal knowledge base.
Given the base command below, decide whether a web search would help understand it.
Respond with strict JSON only, no prose, matching this shape exactly:
{"base_cmd": "string", "known": true|false, "intent": "string", "keywords": ["string", ...], "search_query": "string or null", "notes": "string"}

base_command: {base_cmd}
full_command: {raw_command}
"#;

/// Bumped whenever `PROMPT_TEMPLATE`'s shape changes, so stored classification
/// rows can be told apart from ones produced by an earlier prompt.
const PROMPT_VERSION: &str = "classify-v1";

#[derive(Debug, Deserialize, Default)]
struct RawClassification {
    base_cmd: Option<String>,
    known: Option<bool>,
    intent: Option<String>,
    search_query: Option<String>,
    keywords: Option<Vec<String>>,
    #[allow(dead_code)]
    notes: Option<String>,
}

/// Forces `known=false` rows to a canonical empty shape and falls back to
/// `base_cmd` when the model omits `search_query`, matching
/// `classify_bash_commands.py::validate_payload`. `summary` is the model's
/// `intent` field verbatim.
fn validate(raw: RawClassification, raw_json: &str, model: &str, base_cmd: &str) -> kb::ClassifyResult {
    let known = raw.known.unwrap_or(false);
    let resolved_base_cmd = raw
        .base_cmd
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| base_cmd.to_string());

    if !known {
        return kb::ClassifyResult {
            known: false,
            base_cmd: Some(resolved_base_cmd),
            search_query: None,
            keywords_json: "[]".to_string(),
            summary: raw.intent,
            result_json: raw_json.to_string(),
            model: model.to_string(),
            prompt_version: PROMPT_VERSION.to_string(),
        };
    }

    let search_query = raw
        .search_query
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| resolved_base_cmd.clone());
    let keywords = raw.keywords.unwrap_or_default();

    kb::ClassifyResult {
        known: true,
        base_cmd: Some(resolved_base_cmd),
        search_query: Some(search_query),
        keywords_json: serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".to_string()),
        summary: raw.intent,
        result_json: raw_json.to_string(),
        model: model.to_string(),
        prompt_version: PROMPT_VERSION.to_string(),
    }
}

pub async fn run(cfg: &Config) -> anyhow::Result<StageReport> {
    let lock_path = cfg.paths.lock("classify_bash_commands");
    let Some(_lock) = ScopedLock::try_acquire(&lock_path)? else {
        return Ok(StageReport::locked());
    };

    let human_notes_pool = crate::store::open_pool(&cfg.paths.human_notes_db())?;
    let human_conn = human_notes_pool.get()?;
    human_notes::ensure_schema(&human_conn)?;

    let kb_pool = crate::store::open_pool(&cfg.paths.kb_db())?;
    let kb_conn = kb_pool.get()?;
    kb::ensure_schema(&kb_conn)?;

    heartbeat::job_start(&human_conn, "classify_bash_commands", "starting")?;
    let started = std::time::Instant::now();
    let result = classify_batch(cfg, &kb_conn).await;
    let duration_ms = started.elapsed().as_millis() as i64;
    match &result {
        Ok(report) => heartbeat::job_finish(&human_conn, "classify_bash_commands", true, &report.to_string(), duration_ms)?,
        Err(e) => heartbeat::job_finish(&human_conn, "classify_bash_commands", false, &e.to_string(), duration_ms)?,
    }
    result
}

async fn classify_batch(cfg: &Config, kb_conn: &Connection) -> anyhow::Result<StageReport> {
    let client = OllamaClient::new(
        cfg.ollama_url.clone(),
        cfg.ollama_model.clone(),
        std::time::Duration::from_secs(60),
    );

    let pending = kb::fetch_pending_classify(kb_conn, cfg.classify_batch as i64)?;
    let mut processed = 0i64;
    let mut errors = 0i64;

    for row in &pending {
        kb::mark_classify_working(kb_conn, row.cmd_id)?;

        let prompt = PROMPT_TEMPLATE
            .replace("{base_cmd}", &row.base_cmd)
            .replace("{raw_command}", &row.raw_command);

        match client.classify_json(&prompt).await {
            Ok(value) => {
                let raw_json = value.to_string();
                let raw: RawClassification = serde_json::from_value(value).unwrap_or_default();
                let result = validate(raw, &raw_json, &cfg.ollama_model, &row.base_cmd);
                kb::mark_classify_done(kb_conn, row.cmd_id, &result)?;
                processed += 1;
            }
            Err(e) => {
                kb::mark_classify_error(kb_conn, row.cmd_id, &e.to_string())?;
                errors += 1;
            }
        }
    }

    Ok(StageReport {
        processed,
        skipped_locked: false,
        detail: format!("{errors} errors of {} pending", pending.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_normalized() {
        let raw = RawClassification {
            known: Some(false),
            intent: Some("unclear".to_string()),
            search_query: Some("should be discarded".to_string()),
            keywords: Some(vec!["x".to_string()]),
            ..Default::default()
        };
        let result = validate(raw, "{}", "llama3", "ls");
        assert!(!result.known);
        assert_eq!(result.search_query, None);
        assert_eq!(result.keywords_json, "[]");
        assert_eq!(result.summary, Some("unclear".to_string()));
        assert_eq!(result.model, "llama3");
        assert_eq!(result.prompt_version, PROMPT_VERSION);
    }

    #[test]
    fn known_command_falls_back_to_base_cmd_query() {
        let raw = RawClassification {
            known: Some(true),
            search_query: Some("   ".to_string()),
            ..Default::default()
        };
        let result = validate(raw, "{}", "llama3", "rsync");
        assert_eq!(result.search_query, Some("rsync".to_string()));
    }

    #[test]
    fn missing_known_field_defaults_to_unknown() {
        let raw = RawClassification::default();
        let result = validate(raw, "{}", "llama3", "nc");
        assert!(!result.known);
    }

    #[test]
    fn model_reported_base_cmd_overrides_ingest_derived_one() {
        let raw = RawClassification {
            base_cmd: Some("systemctl".to_string()),
            known: Some(false),
            ..Default::default()
        };
        let result = validate(raw, "{}", "llama3", "sudo systemctl");
        assert_eq!(result.base_cmd, Some("systemctl".to_string()));
    }
}
