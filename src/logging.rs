//! Structured logging setup. Every run writes to a daily-rotating file
//! under `<private_root>/logs/<job_name>.log`; interactive runs (a TTY
//! attached to stderr) also get a compact stderr layer. Verbosity follows
//! `RUST_LOG` if set, falling back to `Config::log_level`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::paths::Paths;

/// Must be kept alive for the lifetime of the process - dropping it stops
/// the background flush thread and log writes silently stop landing.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init(paths: &Paths, job_name: &str, default_level: &str) -> anyhow::Result<LoggingGuard> {
    let log_dir = paths.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{job_name}.log"));
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if atty_stderr() {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time();
        registry.with(stderr_layer).init();
    } else {
        registry.init();
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn atty_stderr() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}
