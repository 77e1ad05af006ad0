//! Parsing of model replies
//!
//! Models wrap JSON in markdown fences or chatter around it. Parsing tries
//! the raw text, the fence-stripped text and then the first balanced JSON
//! value found inside it.

use crate::error::GatewayError;
use locus_model::{ImplementationLocation, LineRange};
use serde::Deserialize;

/// Remove a surrounding markdown code fence, if any
#[must_use]
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the language tag line
    let body = match without_open.find('\n') {
        Some(idx) if !without_open[..idx].contains(' ') => &without_open[idx + 1..],
        _ => without_open,
    };
    body.strip_suffix("```")
        .or_else(|| body.rfind("```").map(|end| &body[..end]))
        .unwrap_or(body)
        .trim()
}

/// Generated source with fences removed
#[must_use]
pub fn clean_code(content: &str) -> String {
    strip_code_fences(content).to_string()
}

fn balanced_json_from(content: &str, start: usize) -> Option<&str> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&content[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize the first JSON value of type `T` found in a reply
///
/// # Errors
/// Returns [`GatewayError::MalformedResponse`] if no candidate parses.
pub fn parse_json<T>(content: &str) -> Result<T, GatewayError>
where
    T: serde::de::DeserializeOwned,
{
    let stripped = strip_code_fences(content);
    let mut last_err = match serde_json::from_str::<T>(stripped) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    for (idx, ch) in stripped.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        if let Some(candidate) = balanced_json_from(stripped, idx) {
            match serde_json::from_str::<T>(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => last_err = e.to_string(),
            }
        }
    }

    Err(GatewayError::MalformedResponse(last_err))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeaturesPayload {
    List(Vec<String>),
    Wrapped { features: Vec<String> },
}

/// Parse a feature extraction reply
///
/// Accepts a JSON array of strings or `{"features": [...]}`. Blank
/// entries are dropped; an empty result is returned as-is.
///
/// # Errors
/// Returns [`GatewayError::MalformedResponse`] if the reply is not such a list.
pub fn parse_features(content: &str) -> Result<Vec<String>, GatewayError> {
    let list = match parse_json::<FeaturesPayload>(content)? {
        FeaturesPayload::List(list) | FeaturesPayload::Wrapped { features: list } => list,
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLines {
    Text(String),
    Line(u32),
    Pair([u32; 2]),
}

#[derive(Deserialize)]
struct RawLocation {
    file: String,
    #[serde(default, alias = "symbol", alias = "name")]
    function: String,
    lines: RawLines,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationsPayload {
    Wrapped {
        implementation_location: Vec<RawLocation>,
    },
    List(Vec<RawLocation>),
}

/// Parse a localization reply into implementation locations
///
/// # Errors
/// Returns [`GatewayError::MalformedResponse`] if the reply is not a
/// location list or any entry has an unreadable line range.
pub fn parse_locations(content: &str) -> Result<Vec<ImplementationLocation>, GatewayError> {
    let raw = match parse_json::<LocationsPayload>(content)? {
        LocationsPayload::Wrapped {
            implementation_location,
        } => implementation_location,
        LocationsPayload::List(list) => list,
    };

    raw.into_iter()
        .map(|loc| {
            let lines = match loc.lines {
                RawLines::Text(text) => text
                    .parse::<LineRange>()
                    .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?,
                RawLines::Line(line) => LineRange::new(line, line),
                RawLines::Pair([start, end]) => LineRange::new(start, end),
            };
            Ok(ImplementationLocation {
                file: loc.file,
                function: loc.function,
                lines,
                reason: loc.reason.filter(|r| !r.trim().is_empty()),
            })
        })
        .collect()
}
