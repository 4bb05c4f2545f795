//! Typed errors for component boundaries that callers must branch on.
//!
//! Stage entry points and `main.rs` still use `anyhow::Result` with
//! `.context(...)` for operator-facing messages; these enums exist where a
//! caller needs to distinguish soft-retry from fatal, e.g. queue-search's
//! `no_results`/`no_urls` handling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

pub type MqResult<T> = Result<T, MqError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("endpoint {url} returned non-success status {status}")]
    Status { url: String, status: u16 },
    #[error("could not parse model output as JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("model returned an empty response")]
    EmptyResponse,
}

pub type LlmResult<T> = Result<T, LlmError>;

/// The outcome of a single search-adapter call, distinguishing the
/// soft-retry conditions (`no_results`, `no_urls`) from hard failures so
/// queue-search can decide whether to leave the row `pending` or mark it
/// `error`.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("request to search endpoint failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search endpoint returned a non-object response body")]
    NotAnObject,
    #[error("search endpoint reported an error: {0}")]
    ApiError(String),
    #[error("no_results: {0}")]
    NoResults(String),
    #[error("no_urls")]
    NoUrls,
}

pub type SearchResult<T> = Result<T, SearchError>;
