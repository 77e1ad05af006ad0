//! Sandbox error types

use thiserror::Error;

/// Infrastructure failure of the sandbox
///
/// A failing test is not an error; see [`crate::ExecutionResult`].
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No container runtime reachable
    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),

    /// Environment could not be created
    #[error("failed to provision environment: {0}")]
    Provision(String),

    /// Environment could not run the test
    #[error("sandbox runtime failure: {0}")]
    Runtime(String),

    /// Filesystem failure while staging
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    /// Wrap an I/O error with context
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the runtime itself is missing
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
