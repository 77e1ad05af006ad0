//! Container runtime seam
//!
//! A runtime provisions one disposable environment per execution, runs the
//! staged test inside it and tears it down. [`crate::SandboxExecutor`] owns
//! the lifecycle; runtimes only implement the three primitives.

use crate::error::SandboxError;
use async_trait::async_trait;
use locus_model::ProjectKind;
use std::fmt;
use std::path::PathBuf;

/// Everything needed to build one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Runtime family
    pub kind: ProjectKind,
    /// Source project, never modified
    pub project_root: PathBuf,
    /// Test source to run
    pub test_source: String,
    /// Optional shell fragment run before the service starts
    pub fixture_script: Option<String>,
}

/// Opaque reference to a provisioned environment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentHandle {
    name: String,
    kind: ProjectKind,
}

impl EnvironmentHandle {
    /// Create handle
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ProjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Unique environment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime family
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ProjectKind {
        self.kind
    }
}

impl fmt::Display for EnvironmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Raw result of running a test inside an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Process exit code, `None` if killed by a signal
    pub exit_code: Option<i32>,
    /// Captured output, already reduced to the test runner section
    pub log: String,
}

impl RunOutput {
    /// Whether the test runner exited successfully
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Process isolation capability
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a fresh environment with the test staged
    ///
    /// # Errors
    /// [`SandboxError::Unavailable`] if the runtime is missing, otherwise
    /// [`SandboxError::Provision`] or [`SandboxError::Io`]. Nothing is
    /// left allocated on error.
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, SandboxError>;

    /// Run the staged test to completion
    ///
    /// # Errors
    /// Only infrastructure failures; a failing test is a normal [`RunOutput`].
    async fn run(&self, env: &EnvironmentHandle) -> Result<RunOutput, SandboxError>;

    /// Release the environment; must be safe to call after a failed or
    /// interrupted run
    ///
    /// # Errors
    /// Returns [`SandboxError`] if the runtime refused to release it.
    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError>;
}
