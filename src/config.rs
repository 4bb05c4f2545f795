//! Runtime configuration, resolved through a four-layer precedence chain:
//! hard-coded defaults < `notes_default.json` < HumanNotesDB `app_settings`
//! < environment variables (last wins). See SPEC_FULL.md §2.3.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::paths::Paths;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OLLAMA_MODEL: &str = "gpt-oss:latest";
const DEFAULT_SEARCH_API_BASE: &str = "http://127.0.0.1:8080/v1/search/?q=";

/// Fully resolved configuration threaded through every stage/binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub ollama_url: String,
    pub ollama_model: String,
    pub search_api_base: String,

    pub classify_batch: usize,
    pub search_batch: usize,
    pub search_sleep_secs: f64,

    pub log_level: String,
}

/// The subset of `Paths` surfaced on `Config` for convenience; kept as a
/// thin wrapper rather than flattening so call sites read `cfg.paths.kb_db()`
/// the same way they'd read `cfg.paths.private_root`.
pub type PathsConfig = Paths;

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::new(None),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            search_api_base: DEFAULT_SEARCH_API_BASE.to_string(),
            classify_batch: 20,
            search_batch: 5,
            search_sleep_secs: 1.0,
            log_level: "info".to_string(),
        }
    }
}

/// Shape of `notes_default.json`. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct DefaultsFile {
    #[serde(rename = "ai.ollama.url")]
    ollama_url: Option<String>,
    #[serde(rename = "ai.ollama.model")]
    ollama_model: Option<String>,
    #[serde(rename = "search.api.base")]
    search_api_base: Option<String>,
}

impl Config {
    /// Resolve configuration: defaults -> notes_default.json -> app_settings
    /// (HumanNotesDB) -> environment. Never fails; each layer is best-effort,
    /// matching `notes_config.get_config()`'s forgiving behavior.
    pub fn resolve(private_root: Option<PathBuf>) -> Self {
        let mut cfg = Self {
            paths: Paths::new(private_root),
            ..Self::default()
        };

        if let Some(file) = Self::load_defaults_file(&cfg.paths.notes_default_json()) {
            if let Some(v) = file.ollama_url {
                cfg.ollama_url = v;
            }
            if let Some(v) = file.ollama_model {
                cfg.ollama_model = v;
            }
            if let Some(v) = file.search_api_base {
                cfg.search_api_base = v;
            }
        }

        if let Some(db) = Self::load_app_settings(&cfg.paths.human_notes_db()) {
            if let Some(v) = db.get("ai.ollama.url") {
                cfg.ollama_url = v.clone();
            }
            if let Some(v) = db.get("ai.ollama.model") {
                cfg.ollama_model = v.clone();
            }
            if let Some(v) = db.get("search.api.base") {
                cfg.search_api_base = v.clone();
            }
        }

        if let Ok(v) = std::env::var("OLLAMA_URL") {
            if !v.trim().is_empty() {
                cfg.ollama_url = v;
            }
        }
        if let Ok(v) = std::env::var("BASH_AI_BATCH") {
            if let Ok(n) = v.parse() {
                cfg.classify_batch = n;
            }
        }
        if let Ok(v) = std::env::var("BASH_SEARCH_BATCH") {
            if let Ok(n) = v.parse() {
                cfg.search_batch = n;
            }
        }
        if let Ok(v) = std::env::var("BASH_SEARCH_SLEEP") {
            if let Ok(n) = v.parse() {
                cfg.search_sleep_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            if !v.trim().is_empty() {
                cfg.log_level = v;
            }
        }

        cfg
    }

    fn load_defaults_file(path: &std::path::Path) -> Option<DefaultsFile> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Reads the optional `app_settings(key TEXT, value TEXT)` table from
    /// HumanNotesDB. Absence of the table or the database file is not an
    /// error - it just means this layer contributes nothing.
    fn load_app_settings(db_path: &std::path::Path) -> Option<HashMap<String, String>> {
        if !db_path.exists() {
            return None;
        }
        let conn = rusqlite::Connection::open(db_path).ok()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM app_settings WHERE key IN (?1, ?2, ?3)")
            .ok()?;
        let rows = stmt
            .query_map(
                rusqlite::params!["ai.ollama.url", "ai.ollama.model", "search.api.base"],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .ok()?;
        Some(rows.filter_map(Result::ok).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_file_overrides_hardcoded_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("notes_default.json");
        let mut f = std::fs::File::create(&json_path).unwrap();
        write!(
            f,
            r#"{{"ai.ollama.url": "http://10.0.0.5:11434", "search.api.base": "http://10.0.0.5/v1/search/?q="}}"#
        )
        .unwrap();

        std::env::remove_var("OLLAMA_URL");
        let cfg = Config::resolve(Some(dir.path().to_path_buf()));
        assert_eq!(cfg.ollama_url, "http://10.0.0.5:11434");
        assert_eq!(cfg.search_api_base, "http://10.0.0.5/v1/search/?q=");
        // untouched key keeps the hardcoded default
        assert_eq!(cfg.ollama_model, DEFAULT_OLLAMA_MODEL);
    }

    #[test]
    fn env_var_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OLLAMA_URL", "http://env-override:11434");
        let cfg = Config::resolve(Some(dir.path().to_path_buf()));
        assert_eq!(cfg.ollama_url, "http://env-override:11434");
        std::env::remove_var("OLLAMA_URL");
    }
}
