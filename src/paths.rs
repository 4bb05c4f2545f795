//! Resolves the on-disk layout rooted at `PRIVATE_ROOT`.
//!
//! Mirrors `lib/bootstrap.py`'s `get_paths()`: every database, lock file,
//! and log file this crate touches is derived from one root directory so
//! every stage/binary agrees on where state lives without hardcoding.

use std::path::{Path, PathBuf};

/// Default root when nothing else is configured. The original deployment's
/// default (`/web/private`) is PHP-front-end-specific; this crate defaults
/// to a path under the user's data directory instead.
fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("historian")
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub private_root: PathBuf,
}

impl Paths {
    pub fn new(private_root: Option<PathBuf>) -> Self {
        let private_root = private_root
            .or_else(|| std::env::var_os("PRIVATE_ROOT").map(PathBuf::from))
            .unwrap_or_else(default_root);
        Self { private_root }
    }

    fn db(&self, name: &str) -> PathBuf {
        self.private_root.join("db").join("memory").join(name)
    }

    pub fn human_notes_db(&self) -> PathBuf {
        std::env::var_os("NOTES_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.db("human_notes.db"))
    }

    pub fn kb_db(&self) -> PathBuf {
        self.db("bash_history.db")
    }

    pub fn search_cache_db(&self) -> PathBuf {
        self.db("search_cache.db")
    }

    pub fn ai_meta_db(&self) -> PathBuf {
        self.db("notes_ai_metadata.db")
    }

    pub fn ai_header_db(&self) -> PathBuf {
        self.db("ai_header.db")
    }

    pub fn mq_db(&self) -> PathBuf {
        std::env::var_os("MOTHER_QUEUE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.db("mother_queue.db"))
    }

    pub fn notes_default_json(&self) -> PathBuf {
        std::env::var_os("NOTES_DEFAULT_JSON")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.private_root.join("notes_default.json"))
    }

    pub fn lock(&self, name: &str) -> PathBuf {
        self.private_root.join("locks").join(format!("{name}.lock"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.private_root.join("logs")
    }

    pub fn pid_file(&self, queue: &str) -> PathBuf {
        std::env::temp_dir().join(format!("historian_mq_worker_{queue}.pid"))
    }

    pub fn scripts_dir(&self) -> PathBuf {
        std::env::var_os("HISTORIAN_SCRIPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.private_root.join("scripts"))
    }

    pub fn ensure_parent_dirs(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_db_lives_under_db_memory() {
        let paths = Paths::new(Some(PathBuf::from("/tmp/historian-test")));
        assert_eq!(
            paths.kb_db(),
            PathBuf::from("/tmp/historian-test/db/memory/bash_history.db")
        );
    }

    #[test]
    fn lock_path_has_lock_extension() {
        let paths = Paths::new(Some(PathBuf::from("/tmp/historian-test")));
        assert_eq!(
            paths.lock("ingest_bash_kb_root"),
            PathBuf::from("/tmp/historian-test/locks/ingest_bash_kb_root.lock")
        );
    }
}
