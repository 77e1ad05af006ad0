//! Code definitions extracted from a project

use crate::digest::ContentDigest;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Deterministic definition identifier
///
/// Derived from `file:start_line:name`, so re-extracting the same tree
/// yields the same identifiers and index upserts stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(ContentDigest);

impl DefinitionId {
    /// Derive identifier from provenance
    #[must_use]
    pub fn derive(file: &str, start_line: u32, name: &str) -> Self {
        let key = format!("{file}:{start_line}:{name}");
        Self(ContentDigest::compute(key.as_bytes()))
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short())
    }
}

/// Definition kind classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// Free function or arrow function bound to a name
    Function,
    /// Function declared inside a class or impl block
    Method,
    /// Class declaration
    Class,
    /// Interface or trait
    Interface,
    /// Struct, enum or type alias
    Type,
    /// Module-level item
    Module,
}

impl DefinitionKind {
    /// Lowercase label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Module => "module",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named definition with file and line provenance
///
/// Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDefinition {
    /// Stable identifier
    pub id: DefinitionId,
    /// Definition name
    pub name: String,
    /// File path relative to the project root, `/`-separated
    pub file: String,
    /// First line, 1-based
    pub start_line: u32,
    /// Last line, 1-based, inclusive
    pub end_line: u32,
    /// Kind of definition
    pub kind: DefinitionKind,
    /// First source line, trimmed
    pub signature: String,
    /// Raw source text of the definition
    pub text: String,
}

impl CodeDefinition {
    /// Create a definition, deriving its identifier and signature
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        file: impl Into<String>,
        start_line: u32,
        end_line: u32,
        kind: DefinitionKind,
        text: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let file = file.into();
        let text = text.into();
        let signature = text.lines().next().unwrap_or_default().trim().to_string();
        Self {
            id: DefinitionId::derive(&file, start_line, &name),
            name,
            file,
            start_line,
            end_line: end_line.max(start_line),
            kind,
            signature,
            text,
        }
    }

    /// Line span as `start-end`
    #[inline]
    #[must_use]
    pub fn span(&self) -> String {
        format!("{}-{}", self.start_line, self.end_line)
    }
}

/// Render an outline of definitions grouped by file
///
/// This is the condensed "code structure" handed to the language model
/// where the full text would not fit.
#[must_use]
pub fn render_code_structure(definitions: &[CodeDefinition]) -> String {
    let mut sorted: Vec<&CodeDefinition> = definitions.iter().collect();
    sorted.sort_by(|a, b| (&a.file, a.start_line).cmp(&(&b.file, b.start_line)));

    let mut out = String::new();
    let mut current: Option<&str> = None;
    for def in sorted {
        if current != Some(def.file.as_str()) {
            let _ = writeln!(out, "## {}", def.file);
            current = Some(def.file.as_str());
        }
        let _ = writeln!(
            out,
            "- {} {} (lines {}): {}",
            def.kind,
            def.name,
            def.span(),
            def.signature
        );
    }
    out
}
