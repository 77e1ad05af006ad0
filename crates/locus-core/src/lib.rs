//! Locus Core - feature localization and self-healing verification
//!
//! - [`FeatureLocalizer`]: fans a description out into per-feature
//!   retrieval and localization, concurrently with plan generation
//! - [`RepairLoop`]: generate, execute, diagnose and repair one test under
//!   a bounded retry budget
//! - [`AnalysisPipeline`]: ties both to the definition store and the
//!   content-addressed result cache
//!
//! # Example
//!
//! ```rust,ignore
//! use locus_core::{AnalysisPipeline, AnalysisRequest, LocusConfig};
//! use locus_model::ProjectArchive;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = LocusConfig::load("locus.toml")?.with_env_overrides();
//! locus_core::telemetry::init(&config.telemetry)?;
//!
//! let pipeline = AnalysisPipeline::from_config(&config)?;
//! let archive = ProjectArchive::from_dir("./todo-api")?;
//! let outcome = pipeline
//!     .run(AnalysisRequest::new("Users can register and create todos", archive).with_verification(true))
//!     .await?;
//!
//! println!("{}", serde_json::to_string_pretty(&*outcome.report)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod repair;
pub mod telemetry;

pub use config::{LocusConfig, LogFormat, RepairConfig, RetrievalConfig, TelemetryConfig};
pub use error::{AbortCause, ExtractionError, LocusError, VerificationAborted};
pub use orchestrator::{FeatureLocalizer, Localization, DEFAULT_TOP_K};
pub use outcome::{FeatureFailure, FeatureOutcome, FeatureResult};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline, AnalysisRequest, ComputedAnalysis, IndexFactory};
pub use repair::{
    validate_transition, Diagnosis, FailureKind, RepairLoop, RepairPhase, RepairRun, MAX_RETRY,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
