//! Definition Store
//!
//! Turns a [`ProjectArchive`] into the request-scoped set of
//! [`CodeDefinition`]s. Per-file failures are collected, never propagated.
//!
//! - [`DefinitionStore`]: async seam used by the pipeline
//! - [`SourceTreeStore`]: tree-sitter implementation over an extracted tree

use crate::error::{ParseError, StoreError};
use crate::language::{extract_definitions, SourceLanguage};
use async_trait::async_trait;
use locus_model::{is_ignored_dir, CodeDefinition, ProjectArchive};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default per-file size limit (512 KiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 512 * 1024;

/// Definitions of one project plus the files that were skipped
#[derive(Debug, Default)]
pub struct DefinitionSet {
    /// Extracted definitions, ordered by file then position
    pub definitions: Vec<CodeDefinition>,
    /// Files that could not be parsed
    pub skipped: Vec<ParseError>,
    /// Source files considered
    pub files_scanned: usize,
}

impl DefinitionSet {
    /// Number of skipped files
    #[inline]
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Source of code definitions for a project
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// List all definitions of a project
    ///
    /// # Errors
    /// Only whole-archive failures are errors; unparseable files land in
    /// [`DefinitionSet::skipped`].
    async fn list_definitions(&self, archive: &ProjectArchive) -> Result<DefinitionSet, StoreError>;
}

/// Tree-sitter backed definition store
#[derive(Debug, Clone)]
pub struct SourceTreeStore {
    max_file_bytes: u64,
}

impl Default for SourceTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTreeStore {
    /// Create store with default limits
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Override per-file size limit
    #[inline]
    #[must_use]
    pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
        self.max_file_bytes = limit;
        self
    }

    /// Synchronous extraction, parallel over files
    ///
    /// # Errors
    /// Returns [`StoreError::NotADirectory`] if `root` is not a directory.
    pub fn scan(&self, root: &Path) -> Result<DefinitionSet, StoreError> {
        if !root.is_dir() {
            return Err(StoreError::NotADirectory(root.to_path_buf()));
        }

        let files = source_files(root);
        let files_scanned = files.len();

        let results: Vec<Result<Vec<CodeDefinition>, ParseError>> = files
            .par_iter()
            .map(|(path, language)| self.scan_file(root, path, *language))
            .collect();

        let mut set = DefinitionSet {
            files_scanned,
            ..DefinitionSet::default()
        };
        for result in results {
            match result {
                Ok(defs) => set.definitions.extend(defs),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping file");
                    set.skipped.push(err);
                }
            }
        }

        tracing::info!(
            files = files_scanned,
            definitions = set.definitions.len(),
            skipped = set.skipped.len(),
            "definitions extracted"
        );
        Ok(set)
    }

    fn scan_file(
        &self,
        root: &Path,
        path: &Path,
        language: SourceLanguage,
    ) -> Result<Vec<CodeDefinition>, ParseError> {
        let io_err = |source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = std::fs::metadata(path).map_err(io_err)?.len();
        if size > self.max_file_bytes {
            return Err(ParseError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_file_bytes,
            });
        }

        let bytes = std::fs::read(path).map_err(io_err)?;
        let source = String::from_utf8(bytes).map_err(|_| ParseError::Encoding {
            path: path.to_path_buf(),
        })?;

        extract_definitions(language, &relative_path(root, path), &source)
    }
}

#[async_trait]
impl DefinitionStore for SourceTreeStore {
    async fn list_definitions(&self, archive: &ProjectArchive) -> Result<DefinitionSet, StoreError> {
        let store = self.clone();
        let root = archive.root().to_path_buf();
        tokio::task::spawn_blocking(move || store.scan(&root))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Supported source files under `root`, sorted by path
fn source_files(root: &Path) -> Vec<(PathBuf, SourceLanguage)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry.file_name().to_str().is_some_and(is_ignored_dir)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            SourceLanguage::from_path(entry.path()).map(|lang| (entry.into_path(), lang))
        })
        .collect()
}

/// `/`-separated path relative to `root`
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/lib")).unwrap();
        fs::write(
            dir.path().join("src/channel.ts"),
            "export function createChannel(name: string) {\n  return name;\n}\n",
        )
        .unwrap();
        fs::write(dir.path().join("src/util.py"), "def slugify(s):\n    return s\n").unwrap();
        fs::write(dir.path().join("node_modules/lib/index.js"), "function vendored() {}\n").unwrap();
        fs::write(dir.path().join("README.md"), "# readme\n").unwrap();
        dir
    }

    #[test]
    fn scans_supported_files_and_skips_ignored_dirs() {
        let dir = project();
        let set = SourceTreeStore::new().scan(dir.path()).unwrap();
        let names: Vec<_> = set.definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["createChannel", "slugify"]);
        assert_eq!(set.files_scanned, 2);
        assert_eq!(set.definitions[0].file, "src/channel.ts");
        assert_eq!(set.skipped_count(), 0);
    }

    #[test]
    fn bad_files_are_skipped_not_fatal() {
        let dir = project();
        fs::write(dir.path().join("src/latin1.py"), [0x64, 0x65, 0x66, 0xff, 0xfe]).unwrap();
        fs::write(dir.path().join("src/huge.ts"), "x".repeat(2048)).unwrap();

        let set = SourceTreeStore::new()
            .with_max_file_bytes(1024)
            .scan(dir.path())
            .unwrap();

        assert_eq!(set.skipped_count(), 2);
        assert!(set
            .skipped
            .iter()
            .any(|e| matches!(e, ParseError::Encoding { .. })));
        assert!(set
            .skipped
            .iter()
            .any(|e| matches!(e, ParseError::TooLarge { size: 2048, .. })));
        assert_eq!(set.definitions.len(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SourceTreeStore::new().scan(&missing),
            Err(StoreError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn async_store_matches_scan() {
        let dir = project();
        let archive = ProjectArchive::from_dir(dir.path()).unwrap();
        let store = SourceTreeStore::new();
        let set = store.list_definitions(&archive).await.unwrap();
        assert_eq!(set.definitions.len(), 2);
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/tmp/project");
        assert_eq!(
            relative_path(root, &root.join("src").join("a.ts")),
            "src/a.ts"
        );
    }
}
