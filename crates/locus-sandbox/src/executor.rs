//! Sandbox Test Executor
//!
//! One call, one environment:
//! 1. provision a fresh environment with the test staged
//! 2. run it under a wall-clock timeout
//! 3. release it on every exit path
//!
//! Release is explicit on the normal path. If the calling future is dropped
//! mid-run, [`EnvironmentGuard`]'s `Drop` hands the teardown to the runtime
//! so abandoned requests still clean up.

use crate::error::SandboxError;
use crate::runtime::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec};
use locus_model::{ProjectArchive, ProjectKind};
use std::sync::Arc;
use std::time::Duration;

/// Default per-execution timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of one test execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Whether the test runner exited successfully
    pub passed: bool,
    /// Captured log, or a synthetic message on timeout
    pub log: String,
    /// Whether the run hit the timeout
    pub timed_out: bool,
}

/// Releases an environment on every exit path
pub struct EnvironmentGuard {
    runtime: Arc<dyn ContainerRuntime>,
    handle: Option<EnvironmentHandle>,
}

impl EnvironmentGuard {
    /// Guard a provisioned environment
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, handle: EnvironmentHandle) -> Self {
        Self {
            runtime,
            handle: Some(handle),
        }
    }

    /// Guarded handle
    #[must_use]
    pub fn handle(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    /// Tear down now, logging failures
    ///
    /// The handle stays armed until teardown returns, so cancelling this
    /// future still hands the environment to `Drop`.
    pub async fn release(mut self) {
        if let Some(handle) = self.handle.clone() {
            teardown_logged(self.runtime.as_ref(), &handle).await;
        }
        self.handle = None;
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = Arc::clone(&self.runtime);
                tracing::debug!(env = %handle, "releasing abandoned environment");
                rt.spawn(async move {
                    teardown_logged(runtime.as_ref(), &handle).await;
                });
            }
            Err(_) => {
                tracing::error!(env = %handle, "environment leaked: no runtime to tear it down");
            }
        }
    }
}

async fn teardown_logged(runtime: &dyn ContainerRuntime, handle: &EnvironmentHandle) {
    match runtime.teardown(handle).await {
        Ok(()) => tracing::debug!(env = %handle, "environment released"),
        Err(e) => tracing::warn!(env = %handle, error = %e, "environment teardown failed"),
    }
}

/// Runs generated tests in disposable environments
#[derive(Clone)]
pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
    fixture_script: Option<String>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("timeout", &self.timeout)
            .field("fixture_script", &self.fixture_script.is_some())
            .finish_non_exhaustive()
    }
}

impl SandboxExecutor {
    /// Create executor over a runtime
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            timeout: DEFAULT_TIMEOUT,
            fixture_script: None,
        }
    }

    /// Set the per-execution timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a fixture script run before the service starts
    #[inline]
    #[must_use]
    pub fn with_fixture_script(mut self, script: Option<String>) -> Self {
        self.fixture_script = script;
        self
    }

    /// Execution timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one test in a fresh environment
    ///
    /// A failing or timed-out test is `Ok` with `passed == false`.
    ///
    /// # Errors
    /// Returns [`SandboxError`] on infrastructure failure. The environment,
    /// if one was provisioned, is released before returning.
    pub async fn execute(
        &self,
        test_source: &str,
        archive: &ProjectArchive,
        kind: ProjectKind,
    ) -> Result<ExecutionResult, SandboxError> {
        let spec = EnvironmentSpec {
            kind,
            project_root: archive.root().to_path_buf(),
            test_source: test_source.to_string(),
            fixture_script: self.fixture_script.clone(),
        };

        let handle = self.runtime.provision(&spec).await?;
        tracing::debug!(env = %handle, kind = %kind, "environment provisioned");
        let guard = EnvironmentGuard::new(Arc::clone(&self.runtime), handle.clone());

        let outcome = tokio::time::timeout(self.timeout, self.runtime.run(&handle)).await;
        guard.release().await;

        match outcome {
            Ok(Ok(output)) => {
                let passed = output.passed();
                tracing::info!(env = %handle, passed, exit_code = ?output.exit_code, "test executed");
                Ok(ExecutionResult {
                    passed,
                    log: output.log,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(env = %handle, error = %e, "test execution failed");
                Err(e)
            }
            Err(_) => {
                let secs = self.timeout.as_secs();
                tracing::warn!(env = %handle, timeout_secs = secs, "test execution timed out");
                Ok(ExecutionResult {
                    passed: false,
                    log: format!("Test execution timed out after {secs} seconds"),
                    timed_out: true,
                })
            }
        }
    }
}
