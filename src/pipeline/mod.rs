//! The five incremental stages that turn raw shell history into searched,
//! summarized, metadata-tagged notes. Each stage owns its own watermark,
//! idempotency key, and lock, and reports a [`StageReport`] the
//! orchestrator and CLI both print the same way.

pub mod classify;
pub mod ingest;
pub mod note_metadata;
pub mod queue_search;
pub mod search_summarize;

use std::fmt;

/// Summary of one stage invocation, independent of which stage ran.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub processed: i64,
    pub skipped_locked: bool,
    pub detail: String,
}

impl StageReport {
    pub fn locked() -> Self {
        Self {
            processed: 0,
            skipped_locked: true,
            detail: "another instance already holds the lock".to_string(),
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped_locked {
            write!(f, "skipped (locked)")
        } else {
            write!(f, "processed {} ({})", self.processed, self.detail)
        }
    }
}
