//! Note-metadata: generates structured tags/summary/entities for every
//! note, keyed by a content hash so a note is only ever re-summarized when
//! it actually changes.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::heartbeat;
use crate::lock::ScopedLock;
use crate::llm::OllamaClient;
use crate::pipeline::StageReport;
use crate::store::{ai_meta, human_notes};

const DEFAULT_BACKTRACK: i64 = 200;
const DEFAULT_NOTES_LIMIT: i64 = 500;

const PROMPT_TEMPLATE: &str = r#"Read the note below and produce strict JSON only, no prose, with this shape:
{"doc_kind": "string", "summary": "string", "tags": ["string"], "entities": ["string"],
 "commands": ["string"], "cmd_families": ["string"], "sensitivity": "low|medium|high"}

note:
{note}
"#;

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawMeta {
    doc_kind: Option<String>,
    summary: Option<String>,
    tags: Option<Vec<String>>,
    entities: Option<Vec<String>>,
    commands: Option<Vec<String>>,
    cmd_families: Option<Vec<String>>,
    sensitivity: Option<String>,
}

/// `SHA-256(notes_type || "\n" || topic || "\n" || updated_at || "\n" ||
/// note)` - changes iff any of those four fields change.
pub fn source_hash(notes_type: &str, topic: &str, updated_at: &str, note: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(notes_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(topic.as_bytes());
    hasher.update(b"\n");
    hasher.update(updated_at.as_bytes());
    hasher.update(b"\n");
    hasher.update(note.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn run(cfg: &Config) -> anyhow::Result<StageReport> {
    let lock_path = cfg.paths.lock("ai_notes");
    let Some(_lock) = ScopedLock::try_acquire(&lock_path)? else {
        return Ok(StageReport::locked());
    };

    let human_notes_pool = crate::store::open_pool(&cfg.paths.human_notes_db())?;
    let human_conn = human_notes_pool.get()?;
    human_notes::ensure_schema(&human_conn)?;

    let ai_meta_pool = crate::store::open_pool(&cfg.paths.ai_meta_db())?;
    let ai_meta_conn = ai_meta_pool.get()?;
    ai_meta::ensure_schema(&ai_meta_conn)?;

    heartbeat::job_start(&human_conn, "ai_notes", "starting")?;
    let started = std::time::Instant::now();
    let result = tag_batch(cfg, &human_conn, &ai_meta_conn).await;
    let duration_ms = started.elapsed().as_millis() as i64;
    match &result {
        Ok(report) => heartbeat::job_finish(&human_conn, "ai_notes", true, &report.to_string(), duration_ms)?,
        Err(e) => heartbeat::job_finish(&human_conn, "ai_notes", false, &e.to_string(), duration_ms)?,
    }
    result
}

async fn tag_batch(
    cfg: &Config,
    human_conn: &Connection,
    ai_meta_conn: &Connection,
) -> anyhow::Result<StageReport> {
    let client = OllamaClient::new(
        cfg.ollama_url.clone(),
        cfg.ollama_model.clone(),
        std::time::Duration::from_secs(120),
    );

    let last_processed = ai_meta::last_processed_note_id(ai_meta_conn)?;
    let start_from = (last_processed - DEFAULT_BACKTRACK).max(0);
    let max_id = human_notes::max_note_id(human_conn)?;
    let limit = ((max_id - start_from).max(0) + 1).min(DEFAULT_NOTES_LIMIT);
    let notes = human_notes::load_notes_since(human_conn, start_from, limit)?;

    let mut tagged = 0i64;
    let mut unchanged = 0i64;

    for note in &notes {
        let hash = source_hash(&note.notes_type, &note.topic, &note.updated_at, &note.note);
        if ai_meta::already_done(ai_meta_conn, note.id, &hash)? {
            unchanged += 1;
            continue;
        }

        let prompt = PROMPT_TEMPLATE.replace("{note}", &note.note);
        let value = client.classify_json(&prompt).await?;
        let raw: RawMeta = serde_json::from_value(value).unwrap_or_default();

        let meta_json = serde_json::to_string(&raw)?;
        let tags_csv = raw.tags.unwrap_or_default().join(",");

        ai_meta::upsert_meta(
            ai_meta_conn,
            &ai_meta::NoteMeta {
                note_id: note.id,
                parent_id: note.parent_id,
                notes_type: &note.notes_type,
                topic: &note.topic,
                source_hash: &hash,
                model_name: &cfg.ollama_model,
                meta_json: &meta_json,
                summary: raw.summary.as_deref().unwrap_or(""),
                tags_csv: &tags_csv,
            },
        )?;
        tagged += 1;
    }

    Ok(StageReport {
        processed: tagged,
        skipped_locked: false,
        detail: format!("{tagged} tagged, {unchanged} unchanged of {} notes", notes.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_changes_when_note_body_changes() {
        let a = source_hash("ai_generated", "topic", "2026-01-01", "body one");
        let b = source_hash("ai_generated", "topic", "2026-01-01", "body two");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_for_identical_input() {
        let a = source_hash("manual", "t", "2026-01-01", "same");
        let b = source_hash("manual", "t", "2026-01-01", "same");
        assert_eq!(a, b);
    }
}
