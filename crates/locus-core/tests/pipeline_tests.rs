use locus_cache::ResultCache;
use locus_core::{AnalysisPipeline, AnalysisRequest, ExtractionError, LocusError};
use locus_gateway::GatewayError;
use locus_index::{RetrievalIndex, SourceTreeStore};
use locus_model::{FailureStage, LocalizationStatus, ProjectArchive, TokenUsage};
use locus_sandbox::SandboxExecutor;
use locus_test_utils::{
    archive, location, node_project, sample_definitions, FlakyIndex, RunStep, ScriptedGateway,
    ScriptedRuntime, StaticStore, CALL_USAGE, FEATURES,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn gateway() -> ScriptedGateway {
    ScriptedGateway::new(FEATURES)
        .with_locations(FEATURES[0], vec![location("src/auth/register.ts", "registerUser", 3, 6)])
        .with_locations(FEATURES[1], vec![location("src/auth/login.ts", "loginUser", 5, 8)])
        .with_locations(FEATURES[2], vec![location("src/todos/service.ts", "createTodo", 10, 12)])
}

fn pipeline(gateway: &Arc<ScriptedGateway>, runtime: &Arc<ScriptedRuntime>) -> AnalysisPipeline {
    AnalysisPipeline::new(
        Arc::new(StaticStore::new(sample_definitions())),
        gateway.clone(),
        SandboxExecutor::new(runtime.clone()),
    )
}

fn request() -> AnalysisRequest {
    AnalysisRequest::new("A todo service with accounts", archive("todo"))
}

fn calls(n: u64) -> TokenUsage {
    std::iter::repeat(CALL_USAGE).take(usize::try_from(n).unwrap()).sum()
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    let first = pipeline.run(request().with_verification(true)).await.unwrap();
    let calls_after_first = gateway.calls.total();
    let second = pipeline.run(request().with_verification(true)).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(
        serde_json::to_string(&*first.report).unwrap(),
        serde_json::to_string(&*second.report).unwrap()
    );
    assert_eq!(gateway.calls.total(), calls_after_first);
    assert_eq!(runtime.runs(), 1);
    assert_eq!(second.usage, TokenUsage::default());
    // extract, three localizations, plan, test generation
    assert_eq!(first.usage, calls(6));
}

#[tokio::test(start_paused = true)]
async fn simultaneous_requests_share_one_pipeline_run() {
    let gateway = Arc::new(gateway().with_extract_delay(Duration::from_millis(500)));
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    let (a, b) = tokio::join!(pipeline.run(request()), pipeline.run(request()));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(gateway.calls.extract.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.calls.plan.load(Ordering::SeqCst), 1);
    assert!(a.cache_hit != b.cache_hit);
    assert!(Arc::ptr_eq(&a.report, &b.report));
    assert_eq!(pipeline.cache().stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_across_threads_compute_once() {
    let gateway = Arc::new(gateway().with_extract_delay(Duration::from_millis(50)));
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = Arc::new(pipeline(&gateway, &runtime));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run(request()).await.unwrap() })
        })
        .collect();
    let mut misses = 0;
    for task in tasks {
        if !task.await.unwrap().cache_hit {
            misses += 1;
        }
    }

    assert_eq!(misses, 1);
    assert_eq!(gateway.calls.extract.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn different_requests_do_not_wait_on_each_other() {
    let gateway = Arc::new(gateway().with_extract_delay(Duration::from_secs(10)));
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    let start = tokio::time::Instant::now();
    let other = AnalysisRequest::new("A todo service with accounts", archive("other"));
    let (a, b) = tokio::join!(pipeline.run(request()), pipeline.run(other));
    assert!(!a.unwrap().cache_hit);
    assert!(!b.unwrap().cache_hit);
    assert!(start.elapsed() < Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn expired_report_is_recomputed_and_overwritten() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime).with_cache(ResultCache::new(Duration::from_secs(60)));

    pipeline.run(request()).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(pipeline.run(request()).await.unwrap().cache_hit);

    tokio::time::advance(Duration::from_secs(31)).await;
    let recomputed = pipeline.run(request()).await.unwrap();
    assert!(!recomputed.cache_hit);
    assert_eq!(gateway.calls.extract.load(Ordering::SeqCst), 2);

    assert!(pipeline.run(request()).await.unwrap().cache_hit);
}

#[tokio::test]
async fn skip_cache_recomputes_and_refreshes() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    let first = pipeline.run(request()).await.unwrap();
    let refreshed = pipeline.run(request().with_skip_cache(true)).await.unwrap();
    let after = pipeline.run(request()).await.unwrap();

    assert!(!refreshed.cache_hit);
    assert_eq!(gateway.calls.extract.load(Ordering::SeqCst), 2);
    assert!(after.cache_hit);
    assert!(Arc::ptr_eq(&after.report, &refreshed.report));
    assert!(!Arc::ptr_eq(&after.report, &first.report));
}

#[tokio::test]
async fn verification_flag_is_part_of_the_key() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    let plain = pipeline.run(request()).await.unwrap();
    let verified = pipeline.run(request().with_verification(true)).await.unwrap();

    assert!(plain.report.functional_verification.is_none());
    assert!(!verified.cache_hit);
    assert!(verified.report.functional_verification.is_some());
}

#[tokio::test]
async fn retrieval_failure_isolated_to_one_feature() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime)
        .with_index_factory(|| -> Box<dyn RetrievalIndex> { Box::new(FlakyIndex::new().failing_on("login")) });

    let outcome = pipeline.run(request()).await.unwrap();
    let analyses = &outcome.report.feature_analysis;

    assert_eq!(analyses.len(), 3);
    assert_eq!(analyses[0].feature_description, FEATURES[0]);
    assert_eq!(analyses[0].status, LocalizationStatus::Found);
    assert!(!analyses[0].implementation_location.is_empty());
    assert!(matches!(
        analyses[1].status,
        LocalizationStatus::Failed { stage: FailureStage::Retrieval, .. }
    ));
    assert!(analyses[1].implementation_location.is_empty());
    assert_eq!(analyses[2].status, LocalizationStatus::Found);
    assert!(!analyses[2].implementation_location.is_empty());
}

#[tokio::test]
async fn extraction_failure_fails_the_request_and_is_not_cached() {
    let gateway = Arc::new(gateway().with_extract_error(GatewayError::MalformedResponse("prose".into())));
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = pipeline(&gateway, &runtime);

    for _ in 0..2 {
        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(
            err,
            LocusError::Extraction(ExtractionError::Gateway(GatewayError::MalformedResponse(_)))
        ));
        assert!(!err.is_retryable());
    }
    assert_eq!(gateway.calls.extract.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.calls.localize.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_sandbox_only_fails_verification() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::unavailable());
    let pipeline = pipeline(&gateway, &runtime);

    let outcome = pipeline.run(request().with_verification(true)).await.unwrap();
    let verification = outcome.report.functional_verification.as_ref().unwrap();

    assert!(!verification.tests_passed);
    assert_eq!(verification.attempts_used, 0);
    assert_eq!(verification.generated_test_code, "test-v1");
    assert!(verification.execution_log.contains("unavailable"));
    assert_eq!(outcome.report.feature_analysis.len(), 3);
    assert!(outcome.report.feature_analysis.iter().all(|a| !a.is_degraded()));
    assert_eq!(runtime.provisioned.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repaired_test_is_reported() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::new(
        [RunStep::Fail("AssertionError: expected 201, got 500".into())],
        RunStep::Pass,
    ));
    let pipeline = pipeline(&gateway, &runtime);

    let outcome = pipeline.run(request().with_verification(true)).await.unwrap();
    let verification = outcome.report.functional_verification.as_ref().unwrap();

    assert!(verification.tests_passed);
    assert_eq!(verification.attempts_used, 2);
    assert_eq!(verification.generated_test_code, "test-v2");
    // extract, three localizations, plan, generation, one repair
    assert_eq!(outcome.usage, calls(7));
}

#[tokio::test(start_paused = true)]
async fn abandoned_request_still_tears_down_and_unlocks() {
    let gateway = Arc::new(gateway());
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Hang));
    let pipeline = pipeline(&gateway, &runtime);

    let abandoned = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run(request().with_verification(true)),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::task::yield_now().await;
    assert_eq!(runtime.provisioned.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.live_environments(), 0);
    assert_eq!(pipeline.cache().stats().in_flight, 0);
}

#[tokio::test]
async fn real_project_is_scanned_and_verified() {
    let project = node_project();
    let archive = ProjectArchive::from_dir(project.path()).unwrap();
    let gateway = Arc::new(
        ScriptedGateway::new(["User registration"])
            .with_locations("User registration", vec![location("src/auth/register.ts", "registerUser", 3, 6)]),
    );
    let runtime = Arc::new(ScriptedRuntime::always(RunStep::Pass));
    let pipeline = AnalysisPipeline::new(
        Arc::new(SourceTreeStore::new()),
        gateway.clone(),
        SandboxExecutor::new(runtime.clone()),
    );

    let outcome = pipeline
        .run(AnalysisRequest::new("Users can sign up", archive).with_verification(true))
        .await
        .unwrap();

    assert_eq!(outcome.skipped_files, 0);
    assert_eq!(gateway.context_size("User registration").map(|n| n > 0), Some(true));
    let verification = outcome.report.functional_verification.as_ref().unwrap();
    assert!(verification.tests_passed);
    assert_eq!(runtime.executed_sources(), ["test-v1"]);
}
