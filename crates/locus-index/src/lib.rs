//! Locus Index - definition extraction and retrieval
//!
//! - [`SourceTreeStore`]: walks a project and extracts definitions with
//!   tree-sitter, one rayon task per file
//! - [`LexicalIndex`]: ranked search over those definitions
//! - [`extract_api_schema`]: schema excerpts for test generation

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod language;
pub mod retrieval;
pub mod schema;
pub mod store;

pub use error::{ParseError, RetrievalError, StoreError};
pub use language::{extract_definitions, SourceLanguage};
pub use retrieval::{tokenize, LexicalIndex, RetrievalIndex, DEFAULT_MAX_SNIPPET_CHARS};
pub use schema::extract_api_schema;
pub use store::{DefinitionSet, DefinitionStore, SourceTreeStore, DEFAULT_MAX_FILE_BYTES};
