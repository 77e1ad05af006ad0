//! Error types for Locus Core
//!
//! Only failures without a sensible degraded value reach the caller:
//! - [`ExtractionError`]: no features, no report
//! - [`LocusError::Store`]: the project could not be read at all
//!
//! Per-feature failures become [`locus_model::LocalizationStatus::Failed`]
//! and a [`VerificationAborted`] becomes a failed
//! [`locus_model::FunctionalVerification`].

use crate::repair::RepairPhase;
use locus_gateway::GatewayError;
use locus_index::StoreError;
use locus_model::TokenUsage;
use locus_sandbox::SandboxError;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum LocusError {
    /// Feature extraction failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Definitions could not be listed
    #[error("definition store failed: {0}")]
    Store(#[from] StoreError),

    /// Gateway could not be constructed
    #[error("gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),
}

impl LocusError {
    /// Whether retrying the request may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extraction(ExtractionError::Gateway(e)) | Self::Gateway(e) => e.is_transient(),
            Self::Extraction(ExtractionError::NoFeatures) | Self::Store(_) => false,
        }
    }
}

/// Feature extraction failure, fatal for the request
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The description yielded zero features
    #[error("no features could be extracted from the description")]
    NoFeatures,

    /// The extraction call failed
    #[error("feature extraction failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Why the repair loop stopped early
#[derive(Debug, thiserror::Error)]
pub enum AbortCause {
    /// Test generation or repair call failed
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// Sandbox could not run the test
    #[error("sandbox: {0}")]
    Sandbox(#[from] SandboxError),

    /// Loop attempted an undefined phase change
    #[error("illegal repair transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current phase
        from: RepairPhase,
        /// Requested phase
        to: RepairPhase,
    },
}

impl AbortCause {
    /// Whether the failure may clear on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_transient(),
            Self::Sandbox(e) => !e.is_unavailable(),
            Self::IllegalTransition { .. } => false,
        }
    }
}

/// Infrastructure failure inside the repair loop, with the progress made
#[derive(Debug, thiserror::Error)]
#[error("verification aborted after {attempts_used} execution(s): {cause}")]
pub struct VerificationAborted {
    /// Executions completed before the failure
    pub attempts_used: u32,
    /// Latest test source, if one was generated
    pub last_source: Option<String>,
    /// Tokens spent before the failure
    pub usage: TokenUsage,
    /// Underlying failure
    #[source]
    pub cause: AbortCause,
}
