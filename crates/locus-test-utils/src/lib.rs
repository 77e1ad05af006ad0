//! Testing utilities for the Locus workspace
//!
//! Scripted doubles for every collaborator seam plus on-disk fixtures.
//! Doubles count their calls so tests can assert on work actually done.

#![allow(missing_docs)]

use async_trait::async_trait;
use locus_gateway::{GatewayError, LanguageModelGateway, TestBrief};
use locus_index::{
    DefinitionSet, DefinitionStore, LexicalIndex, ParseError, RetrievalError, RetrievalIndex, StoreError,
};
use locus_model::{
    ArchiveDigest, CodeDefinition, DefinitionKind, Feature, ImplementationLocation, LineRange,
    ProjectArchive, ProjectKind, Reply, TokenUsage,
};
use locus_sandbox::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, RunOutput, SandboxError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Usage charged by every scripted gateway call
pub const CALL_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 10,
    completion_tokens: 5,
    calls: 1,
};

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct GatewayCalls {
    pub extract: AtomicUsize,
    pub localize: AtomicUsize,
    pub generate: AtomicUsize,
    pub repair: AtomicUsize,
    pub plan: AtomicUsize,
}

impl GatewayCalls {
    pub fn total(&self) -> usize {
        self.extract.load(Ordering::SeqCst)
            + self.localize.load(Ordering::SeqCst)
            + self.generate.load(Ordering::SeqCst)
            + self.repair.load(Ordering::SeqCst)
            + self.plan.load(Ordering::SeqCst)
    }
}

/// Gateway answering from a script
///
/// Generated tests are `test-v1`; the n-th repair returns `test-v{n+1}`.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    features: Vec<String>,
    extract_error: Option<GatewayError>,
    extract_delay: Option<Duration>,
    locations: HashMap<String, Vec<ImplementationLocation>>,
    failing_features: HashSet<String>,
    delays: HashMap<String, Duration>,
    plan: Option<Result<String, GatewayError>>,
    repair_error: Option<GatewayError>,
    pub calls: GatewayCalls,
    repair_inputs: Mutex<Vec<(String, String)>>,
    localize_contexts: Mutex<HashMap<String, usize>>,
}

impl ScriptedGateway {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: features.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_locations(mut self, feature: &str, locations: Vec<ImplementationLocation>) -> Self {
        self.locations.insert(feature.to_string(), locations);
        self
    }

    pub fn with_failing_localization(mut self, feature: &str) -> Self {
        self.failing_features.insert(feature.to_string());
        self
    }

    pub fn with_localize_delay(mut self, feature: &str, delay: Duration) -> Self {
        self.delays.insert(feature.to_string(), delay);
        self
    }

    pub fn with_extract_error(mut self, error: GatewayError) -> Self {
        self.extract_error = Some(error);
        self
    }

    pub fn with_extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = Some(delay);
        self
    }

    pub fn with_plan(mut self, plan: Result<String, GatewayError>) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_repair_error(mut self, error: GatewayError) -> Self {
        self.repair_error = Some(error);
        self
    }

    /// `(prior_source, failure_log)` of every repair call, in order
    pub fn repair_inputs(&self) -> Vec<(String, String)> {
        self.repair_inputs.lock().clone()
    }

    /// Number of snippets the localization of `feature` received
    pub fn context_size(&self, feature: &str) -> Option<usize> {
        self.localize_contexts.lock().get(feature).copied()
    }
}

#[async_trait]
impl LanguageModelGateway for ScriptedGateway {
    async fn extract_features(&self, _description: &str) -> Result<Reply<Vec<String>>, GatewayError> {
        self.calls.extract.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.extract_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.extract_error {
            return Err(error.clone());
        }
        Ok(Reply::new(self.features.clone(), CALL_USAGE))
    }

    async fn localize(
        &self,
        feature: &Feature,
        context: &[CodeDefinition],
    ) -> Result<Reply<Vec<ImplementationLocation>>, GatewayError> {
        self.calls.localize.fetch_add(1, Ordering::SeqCst);
        self.localize_contexts
            .lock()
            .insert(feature.statement.clone(), context.len());
        if let Some(delay) = self.delays.get(&feature.statement) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_features.contains(&feature.statement) {
            return Err(GatewayError::MalformedResponse(format!(
                "no json for {}",
                feature.statement
            )));
        }
        let locations = self
            .locations
            .get(&feature.statement)
            .cloned()
            .unwrap_or_default();
        Ok(Reply::new(locations, CALL_USAGE))
    }

    async fn generate_test(&self, _brief: &TestBrief<'_>) -> Result<Reply<String>, GatewayError> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        Ok(Reply::new("test-v1".to_string(), CALL_USAGE))
    }

    async fn repair_test(
        &self,
        prior_source: &str,
        failure_log: &str,
        _kind: ProjectKind,
    ) -> Result<Reply<String>, GatewayError> {
        let n = self.calls.repair.fetch_add(1, Ordering::SeqCst) + 1;
        self.repair_inputs
            .lock()
            .push((prior_source.to_string(), failure_log.to_string()));
        if let Some(error) = &self.repair_error {
            return Err(error.clone());
        }
        Ok(Reply::new(format!("test-v{}", n + 1), CALL_USAGE))
    }

    async fn generate_plan(
        &self,
        _description: &str,
        _definitions: &[CodeDefinition],
    ) -> Result<Reply<String>, GatewayError> {
        self.calls.plan.fetch_add(1, Ordering::SeqCst);
        match &self.plan {
            Some(Ok(plan)) => Ok(Reply::new(plan.clone(), CALL_USAGE)),
            Some(Err(error)) => Err(error.clone()),
            None => Ok(Reply::new("npm install && npm start".to_string(), CALL_USAGE)),
        }
    }
}

// ---------------------------------------------------------------------------
// Container runtime
// ---------------------------------------------------------------------------

/// One scripted test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStep {
    Pass,
    Fail(String),
    Hang,
    Error,
}

/// Runtime replaying [`RunStep`]s, then repeating the fallback
#[derive(Debug)]
pub struct ScriptedRuntime {
    steps: Mutex<VecDeque<RunStep>>,
    fallback: RunStep,
    unavailable: bool,
    live: Mutex<HashMap<String, String>>,
    executed: Mutex<Vec<String>>,
    pub provisioned: AtomicUsize,
    pub released: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new(steps: impl IntoIterator<Item = RunStep>, fallback: RunStep) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            unavailable: false,
            live: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            provisioned: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn always(step: RunStep) -> Self {
        Self::new([], step)
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::always(RunStep::Pass)
        }
    }

    /// Environments provisioned but not yet torn down
    pub fn live_environments(&self) -> usize {
        self.live.lock().len()
    }

    /// Test sources in execution order
    pub fn executed_sources(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn runs(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, SandboxError> {
        if self.unavailable {
            return Err(SandboxError::Unavailable("scripted runtime offline".into()));
        }
        let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
        let name = format!("scripted-{n}");
        self.live.lock().insert(name.clone(), spec.test_source.clone());
        Ok(EnvironmentHandle::new(name, spec.kind))
    }

    async fn run(&self, env: &EnvironmentHandle) -> Result<RunOutput, SandboxError> {
        let source = self.live.lock().get(env.name()).cloned().unwrap_or_default();
        let attempt = {
            let mut executed = self.executed.lock();
            executed.push(source.clone());
            executed.len()
        };
        let step = self.steps.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            RunStep::Pass => Ok(RunOutput {
                exit_code: Some(0),
                log: format!("attempt {attempt}: {source} passing"),
            }),
            RunStep::Fail(log) => Ok(RunOutput {
                exit_code: Some(1),
                log: format!("attempt {attempt}: {log}"),
            }),
            RunStep::Hang => std::future::pending().await,
            RunStep::Error => Err(SandboxError::Runtime("container exited unexpectedly".into())),
        }
    }

    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError> {
        if self.live.lock().remove(env.name()).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Definition store and retrieval index
// ---------------------------------------------------------------------------

/// Store returning fixed definitions
#[derive(Debug, Default)]
pub struct StaticStore {
    definitions: Vec<CodeDefinition>,
    skipped: Vec<PathBuf>,
    pub calls: AtomicUsize,
}

impl StaticStore {
    pub fn new(definitions: Vec<CodeDefinition>) -> Self {
        Self {
            definitions,
            ..Self::default()
        }
    }

    pub fn with_skipped(mut self, path: impl Into<PathBuf>) -> Self {
        self.skipped.push(path.into());
        self
    }
}

#[async_trait]
impl DefinitionStore for StaticStore {
    async fn list_definitions(&self, _archive: &ProjectArchive) -> Result<DefinitionSet, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DefinitionSet {
            definitions: self.definitions.clone(),
            skipped: self
                .skipped
                .iter()
                .map(|path| ParseError::Encoding { path: path.clone() })
                .collect(),
            files_scanned: self.definitions.len() + self.skipped.len(),
        })
    }
}

/// Lexical index whose queries containing a poisoned term fail
#[derive(Debug, Default)]
pub struct FlakyIndex {
    inner: LexicalIndex,
    poisoned: Vec<String>,
    unavailable: bool,
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, term: &str) -> Self {
        self.poisoned.push(term.to_string());
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl RetrievalIndex for FlakyIndex {
    async fn index(&self, definitions: &[CodeDefinition]) -> Result<(), RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("index offline".into()));
        }
        self.inner.index(definitions).await
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<CodeDefinition>, RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("index offline".into()));
        }
        if let Some(term) = self.poisoned.iter().find(|t| query.contains(t.as_str())) {
            return Err(RetrievalError::Backend(format!("query hit poisoned term {term}")));
        }
        self.inner.search(query, k).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn location(file: &str, function: &str, start: u32, end: u32) -> ImplementationLocation {
    ImplementationLocation {
        file: file.to_string(),
        function: function.to_string(),
        lines: LineRange::new(start, end),
        reason: None,
    }
}

pub fn definition(name: &str, file: &str, start: u32, text: &str) -> CodeDefinition {
    let end = start + u32::try_from(text.lines().count().max(1)).unwrap_or(1) - 1;
    CodeDefinition::new(name, file, start, end, DefinitionKind::Function, text)
}

/// Definitions of a small user/todo service
pub fn sample_definitions() -> Vec<CodeDefinition> {
    vec![
        definition(
            "registerUser",
            "src/auth/register.ts",
            3,
            "export async function registerUser(email: string, password: string) {\n  const hash = await bcrypt.hash(password, 10);\n  return users.insert({ email, hash });\n}",
        ),
        definition(
            "loginUser",
            "src/auth/login.ts",
            5,
            "export async function loginUser(email: string, password: string) {\n  const user = await users.findByEmail(email);\n  return jwt.sign({ sub: user.id });\n}",
        ),
        definition(
            "createTodo",
            "src/todos/service.ts",
            10,
            "export function createTodo(owner: string, title: string) {\n  return todos.insert({ owner, title, done: false });\n}",
        ),
        definition(
            "listTodos",
            "src/todos/service.ts",
            20,
            "export function listTodos(owner: string) {\n  return todos.where({ owner });\n}",
        ),
    ]
}

pub const FEATURES: [&str; 3] = [
    "User registration with hashed passwords",
    "User login issuing a token",
    "Create todo items",
];

/// Archive with a fixed digest at a path that need not exist
pub fn archive(tag: &str) -> ProjectArchive {
    ProjectArchive::with_digest(
        format!("/tmp/locus-fixture-{tag}"),
        ArchiveDigest::of_bytes(tag.as_bytes()),
    )
}

/// Write `files` under a fresh temporary directory
pub fn project_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        write_file(dir.path(), rel, content);
    }
    dir
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Minimal Node service
pub fn node_project() -> tempfile::TempDir {
    project_dir(&[
        ("package.json", r#"{"name":"todo-api","scripts":{"start":"node src/main.js"}}"#),
        (
            "src/auth/register.ts",
            "import bcrypt from 'bcrypt';\n\nexport async function registerUser(email: string, password: string) {\n  const hash = await bcrypt.hash(password, 10);\n  return users.insert({ email, hash });\n}\n",
        ),
        (
            "src/todos/service.ts",
            "export class TodoService {\n  create(owner: string, title: string) {\n    return this.repo.insert({ owner, title });\n  }\n}\n",
        ),
        ("src/todos/create-todo.dto.ts", "export class CreateTodoDto {\n  title: string;\n}\n"),
        ("node_modules/left-pad/index.js", "module.exports = () => {};\n"),
    ])
}
