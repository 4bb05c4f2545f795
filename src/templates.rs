//! Prompt templates, loaded from an optional `ai_header.db` and rendered
//! with `{{dotted.key}}` substitution. Absence of the database (or of a
//! named template) is never fatal - callers fall back to a hardcoded
//! default prompt, matching `ai_templates.py`'s behavior of degrading
//! gracefully when the template store hasn't been set up.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

/// The pieces of a rendered chat template that `/api/chat` needs.
#[derive(Debug, Clone, Default)]
pub struct ChatParts {
    pub system: String,
    pub user: String,
    pub temperature: f64,
}

/// Looks up `name` in `ai_header.db`'s `templates(name, system, user,
/// temperature)` table and renders `{{dotted.key}}` placeholders in both
/// the system and user text against `vars`. Returns `None` if the
/// database, table, or row doesn't exist.
pub fn render_named_template(
    db_path: &Path,
    name: &str,
    vars: &HashMap<String, String>,
) -> Option<ChatParts> {
    if !db_path.exists() {
        return None;
    }
    let conn = Connection::open(db_path).ok()?;
    let row = conn
        .query_row(
            "SELECT system, user, temperature FROM templates WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            },
        )
        .optional()
        .ok()??;

    let (system, user, temperature) = row;
    Some(ChatParts {
        system: render_template(&system, vars),
        user: render_template(&user, vars),
        temperature: temperature.unwrap_or(0.2),
    })
}

/// Substitutes every `{{dotted.key}}` occurrence in `text` with
/// `vars["dotted.key"]`, leaving unknown placeholders untouched.
pub fn render_template(text: &str, vars: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\{\{\s*([a-zA-Z0-9_.]+)\s*\}\}").unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        let key = &caps[1];
        vars.get(key).cloned().unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_keys_and_leaves_unknown_untouched() {
        let mut vars = HashMap::new();
        vars.insert("query.text".to_string(), "git rebase".to_string());
        let rendered = render_template(
            "Summarize results for {{query.text}} using {{missing.key}}.",
            &vars,
        );
        assert_eq!(
            rendered,
            "Summarize results for git rebase using {{missing.key}}."
        );
    }

    #[test]
    fn missing_database_returns_none() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "b".to_string());
        let result = render_named_template(Path::new("/nonexistent/ai_header.db"), "search_summary", &vars);
        assert!(result.is_none());
    }
}
