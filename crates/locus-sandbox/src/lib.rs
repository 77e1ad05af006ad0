//! Locus Sandbox - disposable test execution
//!
//! - [`SandboxExecutor`]: one fresh environment per call, bounded by a
//!   timeout, always torn down
//! - [`ContainerRuntime`]: the isolation primitives an executor drives
//! - [`DockerRuntime`]: implementation over the Docker CLI

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod docker;
pub mod error;
pub mod executor;
pub mod log;
pub mod runtime;
pub mod script;

pub use docker::{stage_environment, DockerRuntime, SandboxConfig};
pub use error::SandboxError;
pub use executor::{EnvironmentGuard, ExecutionResult, SandboxExecutor, DEFAULT_TIMEOUT};
pub use log::{extract_test_output, strip_ansi, TEST_MARKER};
pub use runtime::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, RunOutput};
