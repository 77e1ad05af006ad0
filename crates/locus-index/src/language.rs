//! Supported source languages and tree-sitter definition extraction
//!
//! Each rayon worker keeps its own pool of configured parsers; parsers are
//! expensive to build and not `Sync`.

use crate::error::ParseError;
use locus_model::{CodeDefinition, DefinitionKind};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};

/// Languages the store can extract definitions from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    /// Rust
    Rust,
    /// TypeScript
    TypeScript,
    /// TSX, also used for plain JavaScript and JSX
    Tsx,
    /// Python
    Python,
}

impl SourceLanguage {
    /// Detect language from a file extension
    #[inline]
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "rs" => Some(Self::Rust),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(Self::Tsx),
            "py" => Some(Self::Python),
            _ => None,
        }
    }

    /// Detect language from a path
    #[inline]
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Human-readable name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Python => "python",
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Classify a node as a definition, returning its kind and name node
    fn classify<'t>(self, node: &Node<'t>, in_container: bool) -> Option<(DefinitionKind, Node<'t>)> {
        let kind = match (self, node.kind()) {
            (Self::Python, "function_definition") | (Self::Rust, "function_item") => {
                if in_container {
                    DefinitionKind::Method
                } else {
                    DefinitionKind::Function
                }
            }
            (Self::Python, "class_definition")
            | (Self::TypeScript | Self::Tsx, "class_declaration" | "abstract_class_declaration") => {
                DefinitionKind::Class
            }
            (
                Self::TypeScript | Self::Tsx,
                "function_declaration" | "generator_function_declaration",
            ) => DefinitionKind::Function,
            (Self::TypeScript | Self::Tsx, "method_definition") => DefinitionKind::Method,
            (Self::TypeScript | Self::Tsx, "interface_declaration")
            | (Self::Rust, "trait_item") => DefinitionKind::Interface,
            (Self::TypeScript | Self::Tsx, "type_alias_declaration")
            | (Self::Rust, "struct_item" | "enum_item" | "type_item") => DefinitionKind::Type,
            (Self::Rust, "mod_item") => DefinitionKind::Module,
            (Self::TypeScript | Self::Tsx, "variable_declarator") => {
                let value = node.child_by_field_name("value")?;
                if !matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                    return None;
                }
                DefinitionKind::Function
            }
            _ => return None,
        };
        node.child_by_field_name("name").map(|name| (kind, name))
    }

    /// Nodes whose nested functions are methods
    fn is_container(self, kind: &str) -> bool {
        match self {
            Self::Python => kind == "class_definition",
            Self::Rust => matches!(kind, "impl_item" | "trait_item"),
            Self::TypeScript | Self::Tsx => false,
        }
    }
}

thread_local! {
    static PARSERS: RefCell<HashMap<SourceLanguage, Parser>> = RefCell::new(HashMap::new());
}

fn parse_pooled(language: SourceLanguage, source: &str) -> Result<Option<Tree>, ParseError> {
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let parser = match parsers.entry(language) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut parser = Parser::new();
                parser
                    .set_language(&language.grammar())
                    .map_err(|e| ParseError::Grammar {
                        language: language.name(),
                        reason: e.to_string(),
                    })?;
                entry.insert(parser)
            }
        };
        Ok(parser.parse(source, None))
    })
}

/// Extract definitions from one source file
///
/// `rel_path` is the `/`-separated path recorded on each definition.
///
/// # Errors
/// Returns [`ParseError`] if the grammar cannot be loaded or no tree is
/// produced. Syntax errors inside the file are tolerated.
pub fn extract_definitions(
    language: SourceLanguage,
    rel_path: &str,
    source: &str,
) -> Result<Vec<CodeDefinition>, ParseError> {
    let tree = parse_pooled(language, source)?.ok_or_else(|| ParseError::NoTree {
        path: PathBuf::from(rel_path),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        tracing::debug!(file = rel_path, "syntax errors present, extracting what parsed");
    }

    let mut out = Vec::new();
    visit(language, root, source, rel_path, false, &mut out);
    Ok(out)
}

fn visit(
    language: SourceLanguage,
    node: Node<'_>,
    source: &str,
    rel_path: &str,
    in_container: bool,
    out: &mut Vec<CodeDefinition>,
) {
    if let Some((kind, name_node)) = language.classify(&node, in_container) {
        let name = name_node.utf8_text(source.as_bytes()).unwrap_or_default();
        let text = source.get(node.byte_range()).unwrap_or_default();
        if !name.is_empty() {
            out.push(CodeDefinition::new(
                name,
                rel_path,
                line_number(node.start_position().row),
                line_number(node.end_position().row),
                kind,
                text,
            ));
        }
    }

    let nested = in_container || language.is_container(node.kind());
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        visit(language, child, source, rel_path, nested, out);
    }
}

fn line_number(row: usize) -> u32 {
    u32::try_from(row + 1).unwrap_or(u32::MAX)
}
