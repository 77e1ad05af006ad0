//! API schema excerpts for test generation
//!
//! Collects GraphQL schemas, DTO definitions or OpenAPI documents so the
//! generated test targets the real API surface instead of guessing it.

use crate::store::relative_path;
use locus_model::{is_ignored_dir, ProjectKind};
use std::path::Path;
use walkdir::WalkDir;

/// Maximum number of schema files read
pub const MAX_SCHEMA_FILES: usize = 10;
/// Per-file character limit
pub const MAX_FILE_CHARS: usize = 5000;
/// Total character limit across files
pub const MAX_TOTAL_CHARS: usize = 8000;

const GRAPHQL_SUFFIXES: &[&str] = &[".graphql", ".gql"];
const NODE_DTO_SUFFIXES: &[&str] = &[".input.ts", ".dto.ts", ".args.ts"];
const OPENAPI_NAMES: &[&str] = &["openapi.json", "openapi.yaml", "swagger.json", "swagger.yaml"];

fn is_schema_file(name: &str, kind: ProjectKind) -> bool {
    if GRAPHQL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return true;
    }
    match kind {
        ProjectKind::Node => NODE_DTO_SUFFIXES.iter().any(|s| name.ends_with(s)),
        ProjectKind::Python => OPENAPI_NAMES.contains(&name),
    }
}

/// Concatenated schema excerpt, empty when the project has none
#[must_use]
pub fn extract_api_schema(root: &Path, kind: ProjectKind) -> String {
    let files: Vec<_> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry.file_name().to_str().is_some_and(is_ignored_dir)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| is_schema_file(name, kind))
        })
        .take(MAX_SCHEMA_FILES)
        .collect();

    if files.is_empty() {
        tracing::debug!("no schema files found");
        return String::new();
    }

    let mut parts = Vec::new();
    let mut total = 0;
    for entry in files {
        let content = match std::fs::read(entry.path()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to read schema file");
                continue;
            }
        };
        let content = truncate_chars(&content, MAX_FILE_CHARS);
        let len = content.chars().count();
        if total + len > MAX_TOTAL_CHARS {
            break;
        }
        total += len;
        let rel = relative_path(root, entry.path());
        tracing::debug!(file = %rel, "schema extracted");
        parts.push(format!("--- {rel} ---\n{content}"));
    }
    parts.join("\n\n")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}\n... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}
