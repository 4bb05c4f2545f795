//! Shell history ingestion: tails each user's `.bash_history`, recording a
//! normalized `base_cmd` for every new line so later stages can classify
//! and search by "what kind of command is this" rather than full text.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use rusqlite::Connection;

use crate::config::Config;
use crate::heartbeat;
use crate::lock::ScopedLock;
use crate::pipeline::StageReport;
use crate::store::{human_notes, kb};

/// Resolves the history file for `user`. `root`'s home is `/root`; every
/// other user is assumed to live under `/home/<user>`, matching the
/// layout `ingest_bash_history_to_kb.py` was run against.
fn history_path(user: &str) -> PathBuf {
    if user == "root" {
        PathBuf::from("/root/.bash_history")
    } else {
        PathBuf::from("/home").join(user).join(".bash_history")
    }
}

fn inode_of(path: &Path) -> anyhow::Result<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    Ok(meta.ino().to_string())
}

/// `^[A-Za-z_][A-Za-z0-9_]*=.*$` - a leading environment variable
/// assignment, e.g. `FOO=bar some_command`.
fn is_env_assignment(token: &str) -> bool {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=.*$").unwrap())
        .is_match(token)
}

/// Extracts the normalized base command from a raw history line: drops
/// `#`-prefixed comment lines, splits on the first `&&`/`;`, skips leading
/// env assignments, and skips a single leading `sudo`, matching
/// `ingest_bash_history_to_kb.py::base_command`.
pub fn base_command(raw: &str) -> String {
    if raw.starts_with('#') {
        return String::new();
    }

    let first_segment = match raw.find("&&") {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let first_segment = match first_segment.find(';') {
        Some(idx) => &first_segment[..idx],
        None => first_segment,
    };

    let mut tokens = first_segment.split_whitespace().peekable();
    while let Some(tok) = tokens.peek() {
        if is_env_assignment(tok) {
            tokens.next();
        } else {
            break;
        }
    }
    if tokens.peek() == Some(&"sudo") {
        tokens.next();
    }

    tokens.next().unwrap_or("").to_string()
}

/// Default `enrich_queue` priority for base-command enrichment seeded
/// straight out of ingest.
const ENRICH_BASE_PRIORITY: i64 = 50;

pub fn run(cfg: &Config, users: &[String], all: bool) -> anyhow::Result<StageReport> {
    let lock_path = cfg.paths.lock("ingest_bash_history");
    let Some(_lock) = ScopedLock::try_acquire(&lock_path)? else {
        return Ok(StageReport::locked());
    };

    let human_notes_pool = crate::store::open_pool(&cfg.paths.human_notes_db())?;
    let human_conn = human_notes_pool.get()?;
    human_notes::ensure_schema(&human_conn)?;

    let kb_pool = crate::store::open_pool(&cfg.paths.kb_db())?;
    let kb_conn = kb_pool.get()?;
    kb::ensure_schema(&kb_conn)?;

    heartbeat::with_heartbeat(&human_conn, "ingest_bash_history", "starting", || {
        let mut total_inserted = 0i64;
        let mut details = Vec::new();
        let mut first_err: Option<anyhow::Error> = None;

        // Each user is ingested independently so one user's failure doesn't
        // prevent attempting the rest within this call.
        for user in users {
            match ingest_one_user(&human_conn, &kb_conn, user, all) {
                Ok(inserted) => {
                    total_inserted += inserted;
                    details.push(format!("{user}: {inserted}"));
                }
                Err(e) => {
                    details.push(format!("{user}: error ({e})"));
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e.context(details.join(", ")));
        }

        Ok(StageReport {
            processed: total_inserted,
            skipped_locked: false,
            detail: details.join(", "),
        })
    })
}

fn ingest_one_user(
    human_conn: &Connection,
    kb_conn: &Connection,
    user: &str,
    all: bool,
) -> anyhow::Result<i64> {
    let path = history_path(user);
    if !path.exists() {
        return Ok(0);
    }
    ingest_path(human_conn, kb_conn, user, &path, all)
}

/// Does the actual incremental read/upsert work for one user's history file
/// at `path`. Split out from `ingest_one_user` so the watermark/inode logic
/// can be exercised against a throwaway file instead of a real user's home
/// directory. `all` forces a full rescan from line 1 regardless of the
/// stored watermark.
fn ingest_path(
    human_conn: &Connection,
    kb_conn: &Connection,
    user: &str,
    path: &Path,
    all: bool,
) -> anyhow::Result<i64> {
    let contents = fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let line_count = lines.len() as i64;
    let current_inode = inode_of(path)?;
    let host = crate::util::hostname();

    let watermark = human_notes::load_history_state(human_conn, &host, &path.to_string_lossy())?;

    let start_line = if all {
        1
    } else if !watermark.inode.is_empty()
        && watermark.inode == current_inode
        && line_count >= watermark.last_line
    {
        watermark.last_line + 1
    } else {
        1
    };

    if start_line > line_count {
        return Ok(0);
    }

    let mut inserted = 0i64;
    for (idx, line) in lines.iter().enumerate() {
        let line_no = (idx + 1) as i64;
        if line_no < start_line {
            continue;
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        let base = base_command(raw);
        if base.is_empty() {
            continue;
        }
        let outcome = kb::upsert_command(
            kb_conn,
            &kb::NewCommand {
                host: user,
                full_cmd: raw,
                base_cmd: &base,
            },
        )?;
        if outcome.is_new {
            inserted += 1;
        }
        kb::enqueue_enrich(kb_conn, "base", &base, ENRICH_BASE_PRIORITY)?;
    }

    human_notes::save_history_state(
        human_conn,
        &host,
        &path.to_string_lossy(),
        &current_inode,
        line_count,
    )?;

    Ok(inserted)
}
