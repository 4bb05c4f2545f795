//! The long-running mother-queue worker: leases jobs from a queue one at a
//! time, dispatches them, and acks/fails them. Exits automatically after
//! `auto_exit_seconds` of no work so a forgotten worker doesn't run
//! forever, matching `worker.py`.

use std::time::Duration;

use tracing::{error, info};

use crate::config::Config;
use crate::lock::PidLock;
use crate::mq::MotherQueue;
use crate::store;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct WorkerOptions {
    pub queue: String,
    pub auto_exit_seconds: u64,
}

pub async fn run(cfg: &Config, opts: &WorkerOptions) -> anyhow::Result<()> {
    let pid_path = cfg.paths.pid_file(&opts.queue);
    let Some(_lock) = PidLock::acquire(&pid_path)? else {
        info!(queue = %opts.queue, "worker already running for this queue, exiting");
        return Ok(());
    };

    let pool = store::open_pool(&cfg.paths.mq_db())?;
    let conn = pool.get()?;
    store::mq::ensure_schema(&conn)?;

    let locked_by = format!("{}:{}", crate::util::hostname(), std::process::id());
    let mut idle_since = std::time::Instant::now();

    info!(queue = %opts.queue, %locked_by, "worker started");

    loop {
        let mut mq = MotherQueue::new(&conn);
        match mq.lease_one(&opts.queue, &locked_by)? {
            Some(job) => {
                idle_since = std::time::Instant::now();
                info!(job_id = %job.id, job_name = %job.name, "leased job");
                match dispatch(cfg, &job).await {
                    Ok(()) => mq.ack(&job.id)?,
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "job failed");
                        mq.fail(&job.id, &e.to_string(), 30)?;
                    }
                }
            }
            None => {
                if idle_since.elapsed().as_secs() >= opts.auto_exit_seconds {
                    info!(queue = %opts.queue, "no work for auto-exit window, exiting");
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Executes one leased job. `noop` always succeeds; `ingest_bash_history`
/// calls straight into the pipeline stage rather than shelling out to a
/// script, since the stage already lives in this binary.
async fn dispatch(cfg: &Config, job: &crate::mq::Job) -> anyhow::Result<()> {
    match job.name.as_str() {
        "noop" => Ok(()),
        "ingest_bash_history" => {
            let users: Vec<String> = job
                .payload
                .get("users")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_else(|| vec!["root".to_string()]);
            crate::pipeline::ingest::run(cfg, &users, false)?;
            Ok(())
        }
        "classify_bash_commands" => {
            crate::pipeline::classify::run(cfg).await?;
            Ok(())
        }
        "queue_bash_searches" => {
            crate::pipeline::queue_search::run(cfg).await?;
            Ok(())
        }
        "ai_search_summ" => {
            crate::pipeline::search_summarize::run(cfg).await?;
            Ok(())
        }
        "ai_notes" => {
            crate::pipeline::note_metadata::run(cfg).await?;
            Ok(())
        }
        other => run_script_job(cfg, other, job).await,
    }
}

/// Falls back to `scripts_dir/<name>.{py,sh}` for any job name this binary
/// has no built-in handler for, passing the job payload as JSON on stdin.
/// The interpreted `.py` script is preferred over `.sh` when both exist. If
/// neither exists, the job fails rather than silently no-opping, so a typo'd
/// or unsupported job name surfaces as a failed job instead of disappearing.
async fn run_script_job(cfg: &Config, name: &str, job: &crate::mq::Job) -> anyhow::Result<()> {
    let scripts_dir = cfg.paths.scripts_dir();
    for ext in ["py", "sh"] {
        let script_path = scripts_dir.join(format!("{name}.{ext}"));
        if !script_path.exists() {
            continue;
        }
        let interpreter = if ext == "py" { "python3" } else { "bash" };
        let payload = serde_json::to_string(&job.payload)?;

        let mut child = tokio::process::Command::new(interpreter)
            .arg(&script_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        {
            use tokio::io::AsyncWriteExt;
            let mut stdin = child.stdin.take().expect("stdin was piped");
            stdin.write_all(payload.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "script {} exited with {}: {}",
                script_path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        return Ok(());
    }

    anyhow::bail!("no in-process handler or script found for job {name:?} in {}", scripts_dir.display());
}
