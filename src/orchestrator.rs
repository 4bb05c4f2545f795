//! Runs the full pipeline end-to-end in the right order: ingest for each
//! user, then classify, then queue-search, then (optionally) summarize and
//! tag. Stops at the first stage failure unless `keep_going` is set,
//! matching `process_bash_history.py::main`.

use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{classify, ingest, note_metadata, queue_search, search_summarize, StageReport};

pub struct OrchestratorOptions {
    pub users: Vec<String>,
    pub skip_search_summarize: bool,
    pub skip_note_metadata: bool,
    pub keep_going: bool,
}

pub struct OrchestratorReport {
    pub stages: Vec<(String, StageReport)>,
}

pub async fn run(cfg: &Config, opts: &OrchestratorOptions) -> anyhow::Result<OrchestratorReport> {
    let mut stages = Vec::new();

    macro_rules! run_stage {
        ($name:expr, $result:expr) => {{
            let name: String = $name.to_string();
            match $result {
                Ok(report) => {
                    info!(stage = %name, %report, "stage finished");
                    stages.push((name, report));
                }
                Err(e) => {
                    warn!(stage = %name, error = %e, "stage failed");
                    stages.push((name, StageReport::default()));
                    if !opts.keep_going {
                        return Ok(OrchestratorReport { stages });
                    }
                }
            }
        }};
    }

    // One stage per user, matching `process_bash_history.py::build_plan`'s
    // `ingest:<user>` x N: a failure on one user's ingest doesn't prevent
    // attempting the rest when `keep_going` is set.
    for user in &opts.users {
        run_stage!(
            format!("ingest:{user}"),
            ingest::run(cfg, std::slice::from_ref(user), false)
        );
    }
    run_stage!("classify_bash_commands", classify::run(cfg).await);
    run_stage!("queue_bash_searches", queue_search::run(cfg).await);

    if !opts.skip_search_summarize {
        run_stage!("ai_search_summ", search_summarize::run(cfg).await);
    }
    if !opts.skip_note_metadata {
        run_stage!("ai_notes", note_metadata::run(cfg).await);
    }

    Ok(OrchestratorReport { stages })
}
