//! Local LLM adapter (Ollama). Every call that expects structured output
//! runs the model's raw text through a three-step repair cascade before
//! giving up, because small local models routinely emit almost-valid JSON
//! wrapped in prose or with unescaped control characters.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, LlmResult};

#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Single-shot `/api/generate` call, used by classification where the
    /// prompt is self-contained.
    pub async fn generate(&self, prompt: &str, temperature: f64) -> LlmResult<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Request {
                url: url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(LlmError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let parsed: GenerateResponse = resp.json().await.map_err(|source| LlmError::Request {
            url,
            source,
        })?;
        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed.response)
    }

    /// `/api/chat` call with an explicit system + user message pair, used
    /// by search-summarize and note-metadata where a template may have
    /// supplied a custom system prompt.
    pub async fn chat(&self, system: &str, user: &str, temperature: f64) -> LlmResult<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            options: GenerateOptions { temperature },
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Request {
                url: url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(LlmError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let parsed: ChatResponse = resp.json().await.map_err(|source| LlmError::Request {
            url,
            source,
        })?;
        if parsed.message.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed.message.content)
    }

    /// Runs `prompt` through `generate` and parses the result as a strict
    /// JSON object, repairing the model's output if the first parse fails.
    pub async fn classify_json(&self, prompt: &str) -> LlmResult<Value> {
        let raw = self.generate(prompt, 0.0).await?;
        parse_model_json(&raw)
    }
}

/// `parse -> brace-extract -> escape-repair -> parse` cascade. Builds a
/// list of candidate strings (raw, brace-extracted, escape-repaired) and
/// returns the first that parses as JSON, matching
/// `classify_bash_commands.py::_parse_model_json`.
pub fn parse_model_json(raw: &str) -> LlmResult<Value> {
    let mut candidates = vec![raw.to_string()];

    if let Some(extracted) = extract_json_object(raw) {
        candidates.push(extracted);
    }

    let last = candidates.last().cloned().unwrap_or_else(|| raw.to_string());
    let repaired = repair_invalid_json_escapes(&last);
    if repaired != last {
        candidates.push(repaired);
    }

    let mut last_err = None;
    for candidate in &candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }
    Err(LlmError::InvalidJson(last_err.expect(
        "candidates is never empty so at least one parse attempt runs",
    )))
}

/// Slices from the first `{` to the last `}`, discarding any prose a model
/// wrapped around the JSON body.
fn extract_json_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// Doubles backslashes that don't already start a valid JSON escape
/// sequence, recovering output where a model wrote e.g. a bare `\d` inside
/// a regex string instead of `\\d`.
fn repair_invalid_json_escapes(raw: &str) -> String {
    let re = Regex::new(r#"\\(?:["\\/bfnrt]|u[0-9a-fA-F]{4})|\\"#).unwrap();
    re.replace_all(raw, |caps: &regex::Captures| {
        let m = caps.get(0).unwrap().as_str();
        if m == "\\" {
            "\\\\".to_string()
        } else {
            m.to_string()
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let v = parse_model_json(r#"{"known": true}"#).unwrap();
        assert_eq!(v["known"], Value::Bool(true));
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let v = parse_model_json("Sure, here you go:\n{\"known\": false}\nHope that helps!").unwrap();
        assert_eq!(v["known"], Value::Bool(false));
    }

    #[test]
    fn repairs_unescaped_backslash() {
        let raw = r#"{"search_query": "find files matching \d+"}"#;
        let v = parse_model_json(raw).unwrap();
        assert_eq!(v["search_query"], Value::String("find files matching \\d+".into()));
    }

    #[test]
    fn extract_json_object_ignores_trailing_text() {
        let extracted = extract_json_object("noise {\"a\":1} more noise").unwrap();
        assert_eq!(extracted, "{\"a\":1}");
    }
}
