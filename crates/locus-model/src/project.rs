//! Extracted projects and runtime detection

use crate::digest::{ArchiveDigest, DigestError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directories skipped when scanning, hashing or staging a project
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    "venv",
    "env",
    ".venv",
    "dist",
    "build",
    ".next",
    "coverage",
    ".cache",
    "target",
];

/// Whether a directory name is on the ignore list
#[inline]
#[must_use]
pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

/// An extracted project archive on disk
///
/// The digest is fixed at construction and identifies the contents for
/// caching; the tree itself is treated as read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectArchive {
    root: PathBuf,
    digest: ArchiveDigest,
}

impl ProjectArchive {
    /// Open an extracted project, computing its normalised digest
    ///
    /// # Errors
    /// Returns [`DigestError::Io`] if the tree cannot be read.
    pub fn from_dir(root: impl Into<PathBuf>) -> Result<Self, DigestError> {
        let root = root.into();
        let digest = ArchiveDigest::of_tree(&root)?;
        Ok(Self { root, digest })
    }

    /// Use a digest computed elsewhere (for example over the raw upload)
    #[inline]
    #[must_use]
    pub fn with_digest(root: impl Into<PathBuf>, digest: ArchiveDigest) -> Self {
        Self {
            root: root.into(),
            digest,
        }
    }

    /// Project root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content digest
    #[inline]
    #[must_use]
    pub fn digest(&self) -> &ArchiveDigest {
        &self.digest
    }
}

/// Runtime family of a project, selecting the sandbox image and test harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    /// Node.js (npm, mocha + supertest)
    #[default]
    Node,
    /// Python (pip, pytest + httpx)
    Python,
}

const NODE_MARKERS: &[&str] = &["package.json"];
const PYTHON_MARKERS: &[&str] = &["requirements.txt", "pyproject.toml", "setup.py", "manage.py"];
const NODE_KEYWORDS: &[&str] = &["npm", "node", "yarn", "graphql", "nest", "express"];
const PYTHON_KEYWORDS: &[&str] = &["pip", "python", "uvicorn", "fastapi", "django", "flask"];

impl ProjectKind {
    /// Detect from marker files at the project root
    #[must_use]
    pub fn detect_in(root: &Path) -> Option<Self> {
        if NODE_MARKERS.iter().any(|m| root.join(m).is_file()) {
            Some(Self::Node)
        } else if PYTHON_MARKERS.iter().any(|m| root.join(m).is_file()) {
            Some(Self::Python)
        } else {
            None
        }
    }

    /// Guess from an execution plan, defaulting to Node
    #[must_use]
    pub fn from_plan(plan: &str) -> Self {
        let plan = plan.to_lowercase();
        if NODE_KEYWORDS.iter().any(|k| plan.contains(k)) {
            Self::Node
        } else if PYTHON_KEYWORDS.iter().any(|k| plan.contains(k)) {
            Self::Python
        } else {
            Self::Node
        }
    }

    /// Marker files first, then the plan
    #[must_use]
    pub fn resolve(root: &Path, plan: &str) -> Self {
        Self::detect_in(root).unwrap_or_else(|| Self::from_plan(plan))
    }

    /// Human-readable name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Node => "nodejs",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
