//! Self-Repair Loop Controller
//!
//! A finite state machine over one generated test:
//!
//! ```text
//! Generating -> Executing -> Passed
//!                   |
//!                   +-> Diagnosing -> Repairing -> Executing
//!                   |
//!                   +-> ExhaustedRetries
//! ```
//!
//! The attempt counters live in `RepairState`, scoped to one run and
//! never reset. A failing test is a normal terminal state; only gateway or
//! sandbox infrastructure failures abort, as [`VerificationAborted`].

use crate::error::{AbortCause, VerificationAborted};
use locus_gateway::{LanguageModelGateway, TestBrief};
use locus_model::{FunctionalVerification, ProjectArchive, TokenUsage};
use locus_sandbox::SandboxExecutor;
use std::fmt;
use std::sync::Arc;

/// Repairs allowed after the first execution
pub const MAX_RETRY: u32 = 2;

/// Characters of failure log handed to the repair task
pub const MAX_EXCERPT_CHARS: usize = 4000;

/// Phase of the repair loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairPhase {
    /// Producing the initial test
    Generating,
    /// Running the current test in the sandbox
    Executing,
    /// Classifying a failed run
    Diagnosing,
    /// Asking for a corrected test
    Repairing,
    /// The last run passed
    Passed,
    /// The last run failed and no repairs remain
    ExhaustedRetries,
}

impl RepairPhase {
    /// Phases reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [RepairPhase] {
        use RepairPhase::*;
        match self {
            Generating => &[Executing],
            Executing => &[Passed, Diagnosing, ExhaustedRetries],
            Diagnosing => &[Repairing],
            Repairing => &[Executing],
            Passed | ExhaustedRetries => &[],
        }
    }

    /// Whether the loop stops here
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Check a phase change
///
/// # Errors
/// [`AbortCause::IllegalTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: RepairPhase, to: RepairPhase) -> Result<(), AbortCause> {
    if from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        Err(AbortCause::IllegalTransition { from, to })
    }
}

/// Broad class of a failed test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Hit the execution timeout
    Timeout,
    /// Missing tools, modules or a service that never came up
    Environment,
    /// Test source does not parse
    Syntax,
    /// Test ran and an expectation failed
    Assertion,
    /// Anything else
    Unknown,
}

/// Classification and trimmed log of a failed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    /// Failure class
    pub kind: FailureKind,
    /// First line that looks like an error
    pub summary: String,
    /// Tail of the log passed to the repair task
    pub excerpt: String,
}

impl Diagnosis {
    /// Diagnose a failing log
    #[must_use]
    pub fn of(log: &str, timed_out: bool) -> Self {
        let lower = log.to_lowercase();
        let kind = if timed_out || lower.contains("timed out") || lower.contains("timeout of") {
            FailureKind::Timeout
        } else if [
            "command not found",
            "permission denied",
            "econnrefused",
            "connection refused",
            "cannot find module",
            "modulenotfounderror",
            "no module named",
            "npm err!",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
        {
            FailureKind::Environment
        } else if ["syntaxerror", "indentationerror", "unexpected token", "referenceerror"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            FailureKind::Syntax
        } else if ["assertionerror", "assert ", "expected", "failing"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            FailureKind::Assertion
        } else {
            FailureKind::Unknown
        };

        Self {
            kind,
            summary: first_error_line(log),
            excerpt: tail_chars(log, MAX_EXCERPT_CHARS),
        }
    }
}

fn first_error_line(log: &str) -> String {
    log.lines()
        .find(|line| {
            let lower = line.to_lowercase();
            lower.contains("error") || lower.contains("fail") || lower.contains("timed out")
        })
        .map_or_else(|| "test run failed".to_string(), |line| line.trim().to_string())
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Request-scoped progress of one loop run
#[derive(Debug)]
struct RepairState {
    phase: RepairPhase,
    attempts_used: u32,
    repairs: u32,
    source: Option<String>,
    last_log: String,
    last_timed_out: bool,
    diagnosis: Option<Diagnosis>,
    usage: TokenUsage,
    trail: Vec<RepairPhase>,
}

impl RepairState {
    fn new() -> Self {
        Self {
            phase: RepairPhase::Generating,
            attempts_used: 0,
            repairs: 0,
            source: None,
            last_log: String::new(),
            last_timed_out: false,
            diagnosis: None,
            usage: TokenUsage::default(),
            trail: vec![RepairPhase::Generating],
        }
    }

    fn advance(&mut self, to: RepairPhase) -> Result<(), AbortCause> {
        validate_transition(self.phase, to)?;
        tracing::debug!(from = %self.phase, to = %to, "repair transition");
        self.phase = to;
        self.trail.push(to);
        Ok(())
    }

    fn abort(&self, cause: impl Into<AbortCause>) -> VerificationAborted {
        VerificationAborted {
            attempts_used: self.attempts_used,
            last_source: self.source.clone(),
            usage: self.usage,
            cause: cause.into(),
        }
    }
}

/// Completed loop run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRun {
    /// Final test, log and pass flag
    pub verification: FunctionalVerification,
    /// Tokens spent on generation and repairs
    pub usage: TokenUsage,
    /// Repair calls made
    pub repairs: u32,
    /// Phases visited, in order
    pub trail: Vec<RepairPhase>,
}

/// Generates, executes and repairs one test
#[derive(Clone)]
pub struct RepairLoop {
    gateway: Arc<dyn LanguageModelGateway>,
    executor: SandboxExecutor,
    max_retry: u32,
}

impl fmt::Debug for RepairLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairLoop")
            .field("executor", &self.executor)
            .field("max_retry", &self.max_retry)
            .finish_non_exhaustive()
    }
}

impl RepairLoop {
    /// Create loop
    #[must_use]
    pub fn new(gateway: Arc<dyn LanguageModelGateway>, executor: SandboxExecutor) -> Self {
        Self {
            gateway,
            executor,
            max_retry: MAX_RETRY,
        }
    }

    /// Set the repair budget
    #[inline]
    #[must_use]
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Repair budget
    #[inline]
    #[must_use]
    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Run the loop to a terminal phase
    ///
    /// # Errors
    /// [`VerificationAborted`] on gateway or sandbox infrastructure failure,
    /// carrying the attempts and source reached so far.
    pub async fn run(
        &self,
        brief: &TestBrief<'_>,
        archive: &ProjectArchive,
    ) -> Result<RepairRun, VerificationAborted> {
        let mut state = RepairState::new();

        while !state.phase.is_terminal() {
            match state.phase {
                RepairPhase::Generating => {
                    let reply = self
                        .gateway
                        .generate_test(brief)
                        .await
                        .map_err(|e| state.abort(e))?;
                    state.usage += reply.usage;
                    state.source = Some(reply.value);
                    state.advance(RepairPhase::Executing).map_err(|e| state.abort(e))?;
                }
                RepairPhase::Executing => {
                    let source = state.source.clone().unwrap_or_default();
                    let result = self
                        .executor
                        .execute(&source, archive, brief.kind)
                        .await
                        .map_err(|e| state.abort(e))?;
                    state.attempts_used += 1;
                    state.last_log = result.log;
                    state.last_timed_out = result.timed_out;

                    let next = if result.passed {
                        RepairPhase::Passed
                    } else if state.repairs < self.max_retry {
                        RepairPhase::Diagnosing
                    } else {
                        RepairPhase::ExhaustedRetries
                    };
                    tracing::info!(attempt = state.attempts_used, passed = result.passed, "test attempt finished");
                    state.advance(next).map_err(|e| state.abort(e))?;
                }
                RepairPhase::Diagnosing => {
                    let diagnosis = Diagnosis::of(&state.last_log, state.last_timed_out);
                    tracing::info!(
                        attempt = state.attempts_used,
                        kind = ?diagnosis.kind,
                        summary = %diagnosis.summary,
                        "test failure diagnosed"
                    );
                    state.diagnosis = Some(diagnosis);
                    state.advance(RepairPhase::Repairing).map_err(|e| state.abort(e))?;
                }
                RepairPhase::Repairing => {
                    let prior = state.source.clone().unwrap_or_default();
                    let excerpt = state
                        .diagnosis
                        .take()
                        .map_or_else(|| state.last_log.clone(), |d| d.excerpt);
                    let reply = self
                        .gateway
                        .repair_test(&prior, &excerpt, brief.kind)
                        .await
                        .map_err(|e| state.abort(e))?;
                    state.repairs += 1;
                    state.usage += reply.usage;
                    state.source = Some(reply.value);
                    state.advance(RepairPhase::Executing).map_err(|e| state.abort(e))?;
                }
                RepairPhase::Passed | RepairPhase::ExhaustedRetries => {}
            }
        }

        let tests_passed = state.phase == RepairPhase::Passed;
        if tests_passed {
            tracing::info!(attempts = state.attempts_used, "generated test passed");
        } else {
            tracing::warn!(attempts = state.attempts_used, "generated test still failing, retries exhausted");
        }

        Ok(RepairRun {
            verification: FunctionalVerification {
                generated_test_code: state.source.unwrap_or_default(),
                execution_log: state.last_log,
                tests_passed,
                attempts_used: state.attempts_used,
            },
            usage: state.usage,
            repairs: state.repairs,
            trail: state.trail,
        })
    }
}
