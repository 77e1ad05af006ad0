//! Analysis pipeline
//!
//! request -> cache lookup -> (miss) definitions -> localization, with the
//! plan generated alongside -> optional verification -> cache write.
//!
//! The cache guarantees one computation per [`RequestDigest`] at a time.
//! Its lock covers only that digest's computation.

use crate::config::LocusConfig;
use crate::error::LocusError;
use crate::orchestrator::{FeatureLocalizer, Localization};
use crate::repair::RepairLoop;
use locus_cache::{CachePolicy, ResultCache};
use locus_gateway::{ChatGateway, LanguageModelGateway, TestBrief};
use locus_index::{extract_api_schema, DefinitionStore, LexicalIndex, RetrievalIndex, SourceTreeStore};
use locus_model::{
    render_code_structure, AnalysisReport, CodeDefinition, FunctionalVerification, ProjectArchive,
    ProjectKind, RequestDigest, TokenUsage,
};
use locus_sandbox::{DockerRuntime, SandboxExecutor};
use std::sync::Arc;
use tracing::Instrument;

/// Builds a fresh retrieval index for each request
pub type IndexFactory = Arc<dyn Fn() -> Box<dyn RetrievalIndex> + Send + Sync>;

/// One analysis request
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Natural-language feature description
    pub description: String,
    /// Extracted project
    pub archive: ProjectArchive,
    /// Recompute even if a fresh result is cached
    pub skip_cache: bool,
    /// Generate and run a regression test
    pub enable_verification: bool,
}

impl AnalysisRequest {
    /// Request with cache enabled and verification off
    #[must_use]
    pub fn new(description: impl Into<String>, archive: ProjectArchive) -> Self {
        Self {
            description: description.into(),
            archive,
            skip_cache: false,
            enable_verification: false,
        }
    }

    /// Set the skip-cache flag
    #[inline]
    #[must_use]
    pub fn with_skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    /// Set the verification flag
    #[inline]
    #[must_use]
    pub fn with_verification(mut self, enable: bool) -> Self {
        self.enable_verification = enable;
        self
    }

    /// Cache key of this request
    #[must_use]
    pub fn digest(&self) -> RequestDigest {
        RequestDigest::new(self.archive.digest(), &self.description, self.enable_verification)
    }
}

/// Cached unit of work
#[derive(Debug)]
pub struct ComputedAnalysis {
    /// The report
    pub report: Arc<AnalysisReport>,
    /// Tokens spent computing it
    pub usage: TokenUsage,
    /// Source files that could not be parsed
    pub skipped_files: usize,
}

/// Response to one request
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// The report
    pub report: Arc<AnalysisReport>,
    /// Whether the report came from the cache
    pub cache_hit: bool,
    /// Tokens spent by this request, zero on a hit
    pub usage: TokenUsage,
    /// Source files that could not be parsed
    pub skipped_files: usize,
}

/// End-to-end analysis with caching
pub struct AnalysisPipeline {
    store: Arc<dyn DefinitionStore>,
    localizer: FeatureLocalizer,
    repair: RepairLoop,
    index_factory: IndexFactory,
    cache: ResultCache<ComputedAnalysis>,
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("localizer", &self.localizer)
            .field("repair", &self.repair)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AnalysisPipeline {
    /// Assemble a pipeline from its collaborators
    ///
    /// Uses a [`LexicalIndex`] per request and a default cache.
    #[must_use]
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        gateway: Arc<dyn LanguageModelGateway>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            store,
            localizer: FeatureLocalizer::new(Arc::clone(&gateway)),
            repair: RepairLoop::new(gateway, executor),
            index_factory: Arc::new(|| -> Box<dyn RetrievalIndex> { Box::new(LexicalIndex::new()) }),
            cache: ResultCache::default(),
        }
    }

    /// Production pipeline: HTTP gateway, tree-sitter store, Docker sandbox
    ///
    /// # Errors
    /// [`LocusError::Gateway`] if the HTTP client cannot be built.
    pub fn from_config(config: &LocusConfig) -> Result<Self, LocusError> {
        let gateway: Arc<dyn LanguageModelGateway> = Arc::new(ChatGateway::new(config.gateway.clone())?);
        let executor = SandboxExecutor::new(Arc::new(DockerRuntime::new(config.sandbox.clone())))
            .with_timeout(config.sandbox.timeout())
            .with_fixture_script(config.sandbox.fixture_script.clone());
        let snippet_chars = config.retrieval.max_snippet_chars;

        Ok(Self::new(Arc::new(SourceTreeStore::new()), gateway, executor)
            .with_index_factory(move || -> Box<dyn RetrievalIndex> {
                Box::new(LexicalIndex::new().with_max_snippet_chars(snippet_chars))
            })
            .with_cache(ResultCache::from_config(&config.cache))
            .with_top_k(config.retrieval.top_k)
            .with_max_retry(config.repair.max_retry))
    }

    /// Replace the per-request index constructor
    #[must_use]
    pub fn with_index_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RetrievalIndex> + Send + Sync + 'static,
    {
        self.index_factory = Arc::new(factory);
        self
    }

    /// Replace the result cache
    #[must_use]
    pub fn with_cache(mut self, cache: ResultCache<ComputedAnalysis>) -> Self {
        self.cache = cache;
        self
    }

    /// Set snippets retrieved per feature
    #[must_use]
    pub fn with_top_k(self, top_k: usize) -> Self {
        Self {
            localizer: self.localizer.with_top_k(top_k),
            ..self
        }
    }

    /// Set the repair budget
    #[must_use]
    pub fn with_max_retry(self, max_retry: u32) -> Self {
        Self {
            repair: self.repair.with_max_retry(max_retry),
            ..self
        }
    }

    /// Result cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ResultCache<ComputedAnalysis> {
        &self.cache
    }

    /// Analyse one request
    ///
    /// # Errors
    /// Only when no report can be produced: feature extraction failed or
    /// the project could not be read.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, LocusError> {
        let digest = request.digest();
        let span = tracing::info_span!(
            "analysis",
            digest = %digest.short(),
            verify = request.enable_verification,
            skip_cache = request.skip_cache
        );

        async {
            let policy = CachePolicy::from_skip_cache(request.skip_cache);
            let cached = self
                .cache
                .get_or_compute(digest, policy, || self.compute(&request))
                .await?;

            let usage = if cached.hit {
                TokenUsage::default()
            } else {
                cached.value.usage
            };
            let outcome = AnalysisOutcome {
                report: Arc::clone(&cached.value.report),
                cache_hit: cached.hit,
                usage,
                skipped_files: cached.value.skipped_files,
            };
            tracing::info!(
                cache_hit = outcome.cache_hit,
                features = outcome.report.feature_analysis.len(),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                llm_calls = usage.calls,
                "analysis complete"
            );
            Ok::<_, LocusError>(outcome)
        }
        .instrument(span)
        .await
    }

    async fn compute(&self, request: &AnalysisRequest) -> Result<ComputedAnalysis, LocusError> {
        let set = self.store.list_definitions(&request.archive).await?;
        if set.skipped_count() > 0 {
            tracing::warn!(
                skipped = set.skipped_count(),
                scanned = set.files_scanned,
                "some source files could not be parsed"
            );
        }

        let index = (self.index_factory)();
        let Localization { mut report, mut usage } = self
            .localizer
            .localize(&request.description, &set.definitions, index.as_ref())
            .await?;

        if request.enable_verification {
            let (verification, verification_usage) =
                self.verify(&report, &set.definitions, &request.archive).await;
            usage += verification_usage;
            report.functional_verification = Some(verification);
        }

        Ok(ComputedAnalysis {
            report: Arc::new(report),
            usage,
            skipped_files: set.skipped_count(),
        })
    }

    async fn verify(
        &self,
        report: &AnalysisReport,
        definitions: &[CodeDefinition],
        archive: &ProjectArchive,
    ) -> (FunctionalVerification, TokenUsage) {
        let kind = ProjectKind::resolve(archive.root(), &report.execution_plan_suggestion);
        let api_schema = load_api_schema(archive, kind).await;
        let features = report.features_outline();
        let code_structure = render_code_structure(definitions);
        let brief = TestBrief {
            features: &features,
            execution_plan: &report.execution_plan_suggestion,
            kind,
            api_schema: &api_schema,
            code_structure: &code_structure,
        };
        tracing::info!(kind = %kind, schema_chars = api_schema.len(), "starting functional verification");

        match self.repair.run(&brief, archive).await {
            Ok(run) => (run.verification, run.usage),
            Err(aborted) => {
                tracing::warn!(
                    attempts = aborted.attempts_used,
                    error = %aborted.cause,
                    "verification aborted, reporting failure"
                );
                let verification = FunctionalVerification {
                    generated_test_code: aborted.last_source.unwrap_or_default(),
                    execution_log: format!("Verification could not run: {}", aborted.cause),
                    tests_passed: false,
                    attempts_used: aborted.attempts_used,
                };
                (verification, aborted.usage)
            }
        }
    }
}

async fn load_api_schema(archive: &ProjectArchive, kind: ProjectKind) -> String {
    let root = archive.root().to_path_buf();
    match tokio::task::spawn_blocking(move || extract_api_schema(&root, kind)).await {
        Ok(schema) => schema,
        Err(e) => {
            tracing::warn!(error = %e, "schema extraction failed");
            String::new()
        }
    }
}
