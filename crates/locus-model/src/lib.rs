//! Locus Model - shared data types
//!
//! The request-scoped inputs ([`CodeDefinition`], [`Feature`]), the report
//! returned to callers ([`AnalysisReport`]) and the digests that make the
//! pipeline content-addressed ([`ArchiveDigest`], [`RequestDigest`]).
//!
//! Everything here is immutable data; behaviour lives in the other crates.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod definition;
pub mod digest;
pub mod project;
pub mod report;
pub mod usage;

pub use definition::{render_code_structure, CodeDefinition, DefinitionId, DefinitionKind};
pub use digest::{ArchiveDigest, ContentDigest, DigestError, RequestDigest};
pub use project::{is_ignored_dir, ProjectArchive, ProjectKind, IGNORED_DIRS};
pub use report::{
    AnalysisReport, FailureStage, Feature, FeatureAnalysis, FunctionalVerification,
    ImplementationLocation, LineRange, LineRangeError, LocalizationStatus,
};
pub use usage::{Reply, TokenUsage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
