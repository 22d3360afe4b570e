//! Merge cached model responses into catalog columns.

use serde_json::Value;
use thiserror::Error;

use crate::catalog::Entry;
use crate::features::FeatureSet;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("response is JSON but not an object")]
    NotAnObject,
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") along with the opening fence.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Trim, collapse `', '` list separators, and strip one pair of matching
/// surrounding quotes. Strings with unbalanced quotes come back trimmed but
/// otherwise unchanged.
pub fn strip_surrounding_quotes(s: &str) -> String {
    let s = s.trim().replace("', '", ", ");
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        s[1..s.len() - 1].trim().to_string()
    } else {
        s
    }
}

/// Flatten a response value into a column value.
///
/// Lists are joined with `", "` after stripping each element; objects have no
/// column representation and yield `None`.
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(strip_surrounding_quotes(s)),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) | Value::Array(_) => None,
                    other => normalize_value(other),
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => None,
    }
}

/// Parse a cached response into its JSON object.
pub fn parse_response(text: &str) -> Result<serde_json::Map<String, Value>, MergeError> {
    match serde_json::from_str::<Value>(strip_code_fence(text))? {
        Value::Object(map) => Ok(map),
        _ => Err(MergeError::NotAnObject),
    }
}

/// Merge `text` into `entry`. Returns the number of columns written.
///
/// On error the entry is left untouched. Keys with no matching feature are
/// ignored. When `tag` is given it is written to `tag_column` after a
/// successful merge.
pub fn merge_entry(
    entry: &mut Entry,
    text: &str,
    features: &FeatureSet,
    tag: Option<(&str, &str)>,
) -> Result<usize, MergeError> {
    let object = parse_response(text)?;

    let mut written = 0;
    for (key, value) in &object {
        let Some(feature) = features.get(key) else {
            tracing::debug!(key = %entry.key(), field = %key, "ignoring unmapped response key");
            continue;
        };
        match normalize_value(value) {
            Some(v) => {
                entry.set(feature.column.as_str(), v);
                written += 1;
            }
            None => {
                tracing::debug!(key = %entry.key(), field = %key, "ignoring non-scalar value");
            }
        }
    }

    if let Some((column, value)) = tag {
        if !column.is_empty() {
            entry.set(column, value);
        }
    }
    Ok(written)
}
