//! Small text helpers shared by the services.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

// Statics.

static TRAILING_OBJECT: OnceLock<Regex> = OnceLock::new();

fn trailing_object() -> &'static Regex {
    TRAILING_OBJECT.get_or_init(|| Regex::new(r"\{[\s\S]*\}$").expect("static regex"))
}

// Helpers.

/// First `max` characters of `text` (character based, never splits a code point).
pub fn snippet(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_` and cap the length.
pub fn sanitize_name(raw: &str, max: usize) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .take(max)
        .collect()
}

/// Parse the JSON object a model reply ends with.
///
/// Accepts a bare object, an object wrapped in a ```json fence, or prose
/// followed by an object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let found = trailing_object().find(trimmed)?;

    match serde_json::from_str::<Value>(found.as_str()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };

    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);

    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Join the non-empty sections as `"<heading>\n<body>"` blocks separated by blank lines.
pub fn join_sections(sections: &[(&str, &str)]) -> String {
    sections
        .iter()
        .filter(|(_, body)| !body.trim().is_empty())
        .map(|(heading, body)| format!("{heading}\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// Tests.
