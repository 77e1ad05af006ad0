//! Feature Localization Orchestrator
//!
//! 1. Extract ordered features from the description (fatal on failure)
//! 2. Index the definitions once
//! 3. Per feature, concurrently: retrieve the top-K snippets, then localize
//! 4. Concurrently with step 3, generate the execution plan
//! 5. Join in extraction order and sum token usage
//!
//! Feature tasks share only read-only data. Each returns its own
//! [`FeatureResult`], so the join is the single place results meet.

use crate::error::ExtractionError;
use crate::outcome::{FeatureFailure, FeatureOutcome, FeatureResult};
use futures::future::join_all;
use locus_gateway::LanguageModelGateway;
use locus_index::RetrievalIndex;
use locus_model::{AnalysisReport, CodeDefinition, Feature, Reply, TokenUsage};
use std::sync::Arc;

/// Snippets retrieved per feature
pub const DEFAULT_TOP_K: usize = 10;

/// Report produced by [`FeatureLocalizer::localize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localization {
    /// Report without functional verification
    pub report: AnalysisReport,
    /// Tokens spent across all calls
    pub usage: TokenUsage,
}

impl Localization {
    /// Features whose analysis failed
    #[must_use]
    pub fn degraded_count(&self) -> usize {
        self.report
            .feature_analysis
            .iter()
            .filter(|a| a.is_degraded())
            .count()
    }
}

/// Turns a description into a per-feature location report
#[derive(Clone)]
pub struct FeatureLocalizer {
    gateway: Arc<dyn LanguageModelGateway>,
    top_k: usize,
}

impl std::fmt::Debug for FeatureLocalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureLocalizer")
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl FeatureLocalizer {
    /// Create localizer over a gateway
    #[must_use]
    pub fn new(gateway: Arc<dyn LanguageModelGateway>) -> Self {
        Self {
            gateway,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Set snippets retrieved per feature
    #[inline]
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Snippets retrieved per feature
    #[inline]
    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Localize every feature of `description` in `definitions`
    ///
    /// Returns only once every feature task and the plan task have
    /// finished or degraded.
    ///
    /// # Errors
    /// [`ExtractionError`] if no features could be extracted.
    pub async fn localize(
        &self,
        description: &str,
        definitions: &[CodeDefinition],
        index: &dyn RetrievalIndex,
    ) -> Result<Localization, ExtractionError> {
        let features = self.extract(description).await?;
        let extraction_usage = features.usage;
        let features = features.value;
        tracing::info!(features = features.len(), definitions = definitions.len(), "features extracted");

        let index_failure = match index.index(definitions).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "indexing failed, every feature degrades");
                Some(e.to_string())
            }
        };

        let feature_tasks = join_all(
            features
                .iter()
                .map(|feature| self.analyze_feature(feature, index, index_failure.as_deref())),
        );
        let plan_task = self.plan(description, definitions);
        let (results, (plan, plan_usage)) = tokio::join!(feature_tasks, plan_task);

        let mut usage = extraction_usage + plan_usage;
        let feature_analysis = features
            .iter()
            .zip(results)
            .map(|(feature, result)| {
                usage += result.usage;
                result.outcome.into_analysis(feature)
            })
            .collect();

        let localization = Localization {
            report: AnalysisReport {
                feature_analysis,
                execution_plan_suggestion: plan,
                functional_verification: None,
            },
            usage,
        };
        tracing::info!(
            degraded = localization.degraded_count(),
            tokens = usage.total_tokens(),
            "localization complete"
        );
        Ok(localization)
    }

    async fn extract(&self, description: &str) -> Result<Reply<Vec<Feature>>, ExtractionError> {
        let reply = self.gateway.extract_features(description).await?;
        let features: Vec<Feature> = reply
            .value
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(ordinal, statement)| Feature::new(ordinal, statement))
            .collect();
        if features.is_empty() {
            return Err(ExtractionError::NoFeatures);
        }
        Ok(Reply::new(features, reply.usage))
    }

    async fn analyze_feature(
        &self,
        feature: &Feature,
        index: &dyn RetrievalIndex,
        index_failure: Option<&str>,
    ) -> FeatureResult {
        if let Some(reason) = index_failure {
            return FeatureResult {
                outcome: FeatureOutcome::Error(FeatureFailure::retrieval(reason)),
                usage: TokenUsage::default(),
            };
        }

        let context = match index.search(&feature.statement, self.top_k).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(feature = feature.ordinal, error = %e, "retrieval failed");
                return FeatureResult {
                    outcome: FeatureOutcome::Error(FeatureFailure::retrieval(e.to_string())),
                    usage: TokenUsage::default(),
                };
            }
        };
        tracing::debug!(feature = feature.ordinal, snippets = context.len(), "context retrieved");

        match self.gateway.localize(feature, &context).await {
            Ok(reply) => FeatureResult {
                outcome: FeatureOutcome::from_locations(reply.value),
                usage: reply.usage,
            },
            Err(e) => {
                tracing::warn!(
                    feature = feature.ordinal,
                    category = e.category(),
                    error = %e,
                    "localization failed"
                );
                FeatureResult {
                    outcome: FeatureOutcome::Error(FeatureFailure::localization(e.to_string())),
                    usage: TokenUsage::default(),
                }
            }
        }
    }

    async fn plan(&self, description: &str, definitions: &[CodeDefinition]) -> (String, TokenUsage) {
        match self.gateway.generate_plan(description, definitions).await {
            Ok(reply) => (reply.value, reply.usage),
            Err(e) => {
                tracing::warn!(category = e.category(), error = %e, "execution plan unavailable");
                (String::new(), TokenUsage::default())
            }
        }
    }
}
