//! Command-line surface: one subcommand per pipeline stage plus the
//! orchestrator, worker, and raw queue access.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "historian")]
#[command(version)]
#[command(about = "Durable job pipeline for a self-hosted shell-history knowledge base", long_about = None)]
pub struct Cli {
    /// Root directory for databases, locks, and logs. Overrides PRIVATE_ROOT.
    #[arg(long, global = true)]
    pub private_root: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Whether ingest should only pick up new lines since the last watermark
/// (`new`, the default) or ignore it and rescan the whole file (`all`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImportMode {
    New,
    All,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tail each user's shell history into the knowledge base.
    Ingest {
        /// Comma-separated list of local users to ingest history for.
        #[arg(long, default_value = "root")]
        users: String,

        /// `new` (default) ingests only appended lines; `all` ignores the
        /// watermark and rescans the whole history file.
        #[arg(long, value_enum, default_value_t = ImportMode::New)]
        import: ImportMode,

        /// Shorthand for `--import all`.
        #[arg(long)]
        all: bool,
    },

    /// Classify pending commands with the local LLM.
    Classify,

    /// Seed and drain the search queue for classified commands.
    QueueSearch,

    /// Summarize cached search results into notes.
    SearchSumm,

    /// Generate structured metadata for notes.
    NoteMeta,

    /// Run ingest, classify, queue-search, search-summ, and note-meta in
    /// sequence.
    Orchestrate {
        #[arg(long, default_value = "root")]
        users: String,

        #[arg(long)]
        skip_search_summ: bool,

        #[arg(long)]
        skip_note_meta: bool,

        #[arg(long)]
        keep_going: bool,
    },

    /// Run the long-lived mother-queue worker.
    Worker {
        #[arg(long, default_value = "default")]
        queue: String,

        #[arg(long, default_value_t = 300)]
        auto_exit_seconds: u64,
    },

    /// Push a job onto the mother queue.
    Enqueue {
        #[arg(long, default_value = "default")]
        queue: String,

        #[arg(long)]
        name: String,

        /// JSON payload, e.g. '{"users": ["root"]}'.
        #[arg(long, default_value = "{}")]
        payload: String,

        #[arg(long, default_value_t = 100)]
        priority: i64,

        #[arg(long, default_value_t = 5)]
        max_attempts: i64,
    },
}
