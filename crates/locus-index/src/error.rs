//! Error types for definition extraction and retrieval

use std::path::PathBuf;
use thiserror::Error;

/// A single file that could not be turned into definitions
///
/// Never fatal for the project: the store records it and moves on.
#[derive(Debug, Error)]
pub enum ParseError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File exceeds the size limit
    #[error("{path} is {size} bytes, limit is {limit}")]
    TooLarge {
        /// File path
        path: PathBuf,
        /// Actual size
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// File is not valid UTF-8
    #[error("{path} is not valid UTF-8")]
    Encoding {
        /// File path
        path: PathBuf,
    },

    /// Grammar could not be loaded
    #[error("grammar for {language} unavailable: {reason}")]
    Grammar {
        /// Language name
        language: &'static str,
        /// Loader message
        reason: String,
    },

    /// Parser produced no tree
    #[error("parser produced no syntax tree for {path}")]
    NoTree {
        /// File path
        path: PathBuf,
    },
}

impl ParseError {
    /// Path of the offending file, when known
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Io { path, .. }
            | Self::TooLarge { path, .. }
            | Self::Encoding { path }
            | Self::NoTree { path } => Some(path),
            Self::Grammar { .. } => None,
        }
    }
}

/// Errors that abort a whole store operation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Project root missing or not a directory
    #[error("project root {0} is not a directory")]
    NotADirectory(PathBuf),

    /// Blocking extraction task failed to complete
    #[error("extraction task failed: {0}")]
    Join(String),
}

/// Retrieval index failures
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// Backend rejected or failed the request
    #[error("retrieval backend error: {0}")]
    Backend(String),

    /// Backend not reachable
    #[error("retrieval backend unavailable: {0}")]
    Unavailable(String),
}
