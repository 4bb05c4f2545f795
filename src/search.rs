//! HTTP adapter for the locally-hosted search API that `queue-search`
//! calls for each classified command's `search_query`.

use std::time::Duration;

use serde_json::Value;

use crate::error::{SearchError, SearchResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

/// The outcome of one query, already classified into the three cases
/// `queue_bash_searches.py::main` distinguishes: success with URLs to
/// cache, a soft "come back later", or a hard failure.
#[derive(Debug)]
pub enum SearchOutcome {
    Ok {
        top_urls: Vec<String>,
        response: Value,
    },
    NoResults(String),
    NoUrls,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
        }
    }

    /// `base_url` is expected to already end in a query-string prefix such
    /// as `?q=`; the query is percent-encoded and appended.
    pub async fn query(&self, query: &str) -> SearchResult<SearchOutcome> {
        let url = format!("{}{}", self.base_url, urlencoding::encode(query));
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SearchError::ApiError(format!(
                "http status {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        let Some(obj) = body.as_object() else {
            return Err(SearchError::NotAnObject);
        };

        let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !ok {
            let error = obj
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            if error == "no_results" {
                let msg = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no_results")
                    .to_string();
                return Ok(SearchOutcome::NoResults(msg));
            }
            return Err(SearchError::ApiError(error));
        }

        let top_urls: Vec<String> = obj
            .get("meta")
            .and_then(Value::as_object)
            .and_then(|meta| meta.get("top_urls"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if top_urls.is_empty() {
            return Ok(SearchOutcome::NoUrls);
        }

        Ok(SearchOutcome::Ok {
            top_urls,
            response: body,
        })
    }
}
