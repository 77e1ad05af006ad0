//! Content-addressed digests
//!
//! Provides [`ContentDigest`], a strongly-typed 32-byte Blake3 digest, and
//! the two keys built on it: [`ArchiveDigest`] for a project archive and
//! [`RequestDigest`] for a full analysis request (the result cache key).

use crate::project::is_ignored_dir;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// A 32-byte content digest (Blake3)
///
/// Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Create a digest from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create digest from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| DigestError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Compute Blake3 digest of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Digest identifying the contents of a project archive
///
/// Two archives with the same files (same relative paths, same bytes) have
/// the same digest regardless of how they were packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ArchiveDigest(ContentDigest);

impl ArchiveDigest {
    /// Digest of raw archive bytes, as uploaded
    #[inline]
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(ContentDigest::compute(bytes))
    }

    /// Normalised digest of an extracted project tree
    ///
    /// Files are visited in sorted path order; ignored directories such as
    /// `node_modules` and `.git` do not contribute.
    ///
    /// # Errors
    /// Returns [`DigestError::Io`] if a file or directory cannot be read.
    pub fn of_tree(root: &Path) -> Result<Self, DigestError> {
        let mut hasher = blake3::Hasher::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !is_ignored_dir(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = entry.map_err(|e| DigestError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let bytes = std::fs::read(entry.path()).map_err(|source| DigestError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }

        Ok(Self(ContentDigest::new(*hasher.finalize().as_bytes())))
    }

    /// Get the underlying digest
    #[inline]
    #[must_use]
    pub const fn digest(&self) -> &ContentDigest {
        &self.0
    }
}

impl Display for ArchiveDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cache key for one analysis request
///
/// Binds the archive digest to the problem description and the
/// verification flag, so the same code analysed against a different
/// description never shares a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestDigest(ContentDigest);

impl RequestDigest {
    /// Derive the request key
    #[must_use]
    pub fn new(archive: &ArchiveDigest, description: &str, verify: bool) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"locus:request:v1\0");
        hasher.update(archive.digest().as_bytes());
        hasher.update(&(description.len() as u64).to_le_bytes());
        hasher.update(description.as_bytes());
        hasher.update(&[u8::from(verify)]);
        Self(ContentDigest::new(*hasher.finalize().as_bytes()))
    }

    /// Short form for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl Display for RequestDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors that can occur when computing or parsing digests
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Invalid digest length
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex decoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Project tree could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn content_digest_from_slice_invalid_length() {
        let result = ContentDigest::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(DigestError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn content_digest_display_and_parse() {
        let digest = ContentDigest::compute(b"test");
        let parsed: ContentDigest = digest.to_string().parse().unwrap();
        assert_eq!(digest, parsed);
        assert!(digest.to_string().starts_with(&digest.short()));
    }

    #[test]
    fn content_digest_serde_is_hex_string() {
        let digest = ContentDigest::compute(b"test");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json.len(), 66);
        let decoded: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, decoded);
    }

    #[test]
    fn tree_digest_ignores_vendor_dirs() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("main.py"), "print('hi')").unwrap();
        let before = ArchiveDigest::of_tree(a.path()).unwrap();

        fs::create_dir_all(a.path().join("node_modules/left-pad")).unwrap();
        fs::write(a.path().join("node_modules/left-pad/index.js"), "x").unwrap();
        let after = ArchiveDigest::of_tree(a.path()).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn tree_digest_tracks_content_and_paths() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("app.py"), "x = 1").unwrap();
        let first = ArchiveDigest::of_tree(a.path()).unwrap();

        fs::write(a.path().join("app.py"), "x = 2").unwrap();
        let edited = ArchiveDigest::of_tree(a.path()).unwrap();
        assert_ne!(first, edited);

        fs::rename(a.path().join("app.py"), a.path().join("main.py")).unwrap();
        let renamed = ArchiveDigest::of_tree(a.path()).unwrap();
        assert_ne!(edited, renamed);
    }

    #[test]
    fn tree_digest_is_independent_of_location() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for dir in [a.path(), b.path()] {
            fs::create_dir_all(dir.join("src")).unwrap();
            fs::write(dir.join("src/lib.rs"), "pub fn f() {}").unwrap();
        }
        assert_eq!(
            ArchiveDigest::of_tree(a.path()).unwrap(),
            ArchiveDigest::of_tree(b.path()).unwrap()
        );
    }

    #[test]
    fn request_digest_binds_description_and_flag() {
        let archive = ArchiveDigest::of_bytes(b"zip");
        let base = RequestDigest::new(&archive, "create channels", false);
        assert_eq!(base, RequestDigest::new(&archive, "create channels", false));
        assert_ne!(base, RequestDigest::new(&archive, "send messages", false));
        assert_ne!(base, RequestDigest::new(&archive, "create channels", true));
    }
}
