use anyhow::Result;
use clap::Parser;
use historian::cli::{Cli, Commands, ImportMode};
use historian::config::Config;
use historian::{logging, orchestrator, worker};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::resolve(cli.private_root.clone());

    let job_name = job_name_for(&cli.command);
    let _logging_guard = logging::init(&cfg.paths, job_name, &cfg.log_level)?;

    info!(job = job_name, "historian starting");

    match cli.command {
        Commands::Ingest { users, import, all } => {
            let users = split_users(&users);
            let all_mode = all || import == ImportMode::All;
            let report = historian::pipeline::ingest::run(&cfg, &users, all_mode)?;
            println!("{report}");
        }
        Commands::Classify => {
            let report = historian::pipeline::classify::run(&cfg).await?;
            println!("{report}");
        }
        Commands::QueueSearch => {
            let report = historian::pipeline::queue_search::run(&cfg).await?;
            println!("{report}");
        }
        Commands::SearchSumm => {
            let report = historian::pipeline::search_summarize::run(&cfg).await?;
            println!("{report}");
        }
        Commands::NoteMeta => {
            let report = historian::pipeline::note_metadata::run(&cfg).await?;
            println!("{report}");
        }
        Commands::Orchestrate {
            users,
            skip_search_summ,
            skip_note_meta,
            keep_going,
        } => {
            let opts = orchestrator::OrchestratorOptions {
                users: split_users(&users),
                skip_search_summarize: skip_search_summ,
                skip_note_metadata: skip_note_meta,
                keep_going,
            };
            let report = orchestrator::run(&cfg, &opts).await?;
            for (name, stage) in &report.stages {
                println!("{name}: {stage}");
            }
        }
        Commands::Worker {
            queue,
            auto_exit_seconds,
        } => {
            let opts = worker::WorkerOptions {
                queue,
                auto_exit_seconds,
            };
            worker::run(&cfg, &opts).await?;
        }
        Commands::Enqueue {
            queue,
            name,
            payload,
            priority,
            max_attempts,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let pool = historian::store::open_pool(&cfg.paths.mq_db())?;
            let conn = pool.get()?;
            historian::store::mq::ensure_schema(&conn)?;
            let mq = historian::mq::MotherQueue::new(&conn);
            let id = mq.enqueue(&queue, &name, &payload, priority, max_attempts)?;
            println!("{id}");
        }
    }

    Ok(())
}

fn job_name_for(command: &Commands) -> &'static str {
    match command {
        Commands::Ingest { .. } => "ingest_bash_history",
        Commands::Classify => "classify_bash_commands",
        Commands::QueueSearch => "queue_bash_searches",
        Commands::SearchSumm => "ai_search_summ",
        Commands::NoteMeta => "ai_notes",
        Commands::Orchestrate { .. } => "process_bash_history",
        Commands::Worker { .. } => "mq_worker",
        Commands::Enqueue { .. } => "enqueue",
    }
}

fn split_users(users: &str) -> Vec<String> {
    users
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
