//! JSON parsing with path-aware error messages, used for persisted state.

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

const SNIPPET_CHARS: usize = 20;

/// Parse `body`, reporting failures as `at path 'a.b': expected X, got Y
/// (line L col C)` followed by a caret under the offending spot.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let message = inner.to_string();
        let message = message
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&message);

        let mut report = String::new();
        if !path.is_empty() && path != "." {
            report.push_str(&format!("at path '{path}': "));
        }
        report.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(message),
            snippet(body, line, column)
        ));
        anyhow!(report)
    })
}

/// `invalid type: null, expected a string` becomes `expected a string, got null`.
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.split_once("invalid type: ").map(|(_, rest)| rest)
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        let expected = expected.split(" at line ").next().unwrap_or(expected).trim();
        return format!("expected {expected}, got {actual}");
    }
    message
        .split(" at line ")
        .next()
        .unwrap_or(message)
        .to_owned()
}

/// The characters around `column` (1-based) on `line`, with a caret below.
fn snippet(body: &str, line: usize, column: usize) -> String {
    let chars: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or_default()
        .chars()
        .collect();
    if chars.is_empty() {
        return "(empty line)".to_owned();
    }

    let at = column.saturating_sub(1).min(chars.len());
    let start = at.saturating_sub(SNIPPET_CHARS / 2);
    let end = (at + SNIPPET_CHARS / 2).min(chars.len());
    let excerpt: String = chars[start..end].iter().collect();
    format!("...{excerpt}...\n   {}^", " ".repeat(at - start))
}
