//! Locus Gateway - language model access
//!
//! Five stateless request/response tasks behind one trait:
//! - extract features from a problem description
//! - localize one feature against retrieved snippets
//! - generate an integration test
//! - repair a failing test
//! - suggest an execution plan
//!
//! Every reply carries the [`TokenUsage`] it cost so callers can aggregate
//! usage as values.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod client;
pub mod error;
pub mod parse;
pub mod prompts;

pub use client::{ChatGateway, GatewayConfig};
pub use error::GatewayError;
pub use prompts::{ChatMessage, Role, TestBrief};

use async_trait::async_trait;
use locus_model::{CodeDefinition, Feature, ImplementationLocation, ProjectKind, Reply};
#[doc(no_inline)]
pub use locus_model::TokenUsage;

/// Stateless language model tasks
#[async_trait]
pub trait LanguageModelGateway: Send + Sync {
    /// Split a problem description into feature statements, in order
    async fn extract_features(&self, description: &str) -> Result<Reply<Vec<String>>, GatewayError>;

    /// Locate the code implementing one feature
    async fn localize(
        &self,
        feature: &Feature,
        context: &[CodeDefinition],
    ) -> Result<Reply<Vec<ImplementationLocation>>, GatewayError>;

    /// Produce initial test source
    async fn generate_test(&self, brief: &TestBrief<'_>) -> Result<Reply<String>, GatewayError>;

    /// Produce a repaired test from the failing source and its log
    async fn repair_test(
        &self,
        prior_source: &str,
        failure_log: &str,
        kind: ProjectKind,
    ) -> Result<Reply<String>, GatewayError>;

    /// Suggest how to run the project
    async fn generate_plan(
        &self,
        description: &str,
        definitions: &[CodeDefinition],
    ) -> Result<Reply<String>, GatewayError>;
}
