//! Error taxonomy for the analysis engine.
//!
//! Errors fall into two groups:
//!
//! | Error                  | Raised by         | Effect on the run                     |
//! |------------------------|-------------------|---------------------------------------|
//! | `AnalysisError`        | planner / config  | surfaced before any judge call        |
//! | `JudgeError::Parse`    | judging adapter   | window recorded as undetermined       |
//! | `JudgeError::Invocation` | judging adapter | whole analysis reported as failed     |
//!
//! Callers ask `JudgeError::disposition()` instead of matching on messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnosis::state::IllegalTransition;

/// Errors that stop an analysis before the first window is judged.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The run contains zero steps.
    #[error("run has no steps to analyze")]
    EmptyRun,

    /// Step ordering is ambiguous (duplicate `order` values).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The window loop stopped without reaching a terminal state.
    #[error("analysis ended before reaching a verdict (state {0})")]
    Incomplete(String),

    /// A batch task panicked or was aborted.
    #[error("analysis task failed: {0}")]
    TaskFailed(String),

    /// The diagnosis state machine was driven through an illegal edge.
    #[error(transparent)]
    StateTransition(#[from] IllegalTransition),
}

/// Failure reported by a judging capability backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Transport error, connection refused, or a non-success HTTP status.
    #[error("judge unreachable: {0}")]
    Unreachable(String),

    /// No response within the allotted time.
    #[error("judge timed out: {0}")]
    Timeout(String),
}

/// A judge call that could not produce any response text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The prompt still exceeded the budget at the minimum sample size.
    #[error(
        "context budget exceeded: prompt is {prompt_chars} chars, budget {budget_chars} \
         (sample size floor {floor} reached)"
    )]
    ContextBudgetExceeded {
        prompt_chars: usize,
        budget_chars: usize,
        floor: usize,
    },
}

impl InvocationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Backend(BackendError::Unreachable(_)) => FailureKind::Unreachable,
            Self::Backend(BackendError::Timeout(_)) => FailureKind::Timeout,
            Self::ContextBudgetExceeded { .. } => FailureKind::ContextBudgetExceeded,
        }
    }
}

/// Stable, serializable classification of an invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    Timeout,
    ContextBudgetExceeded,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::Timeout => write!(f, "timeout"),
            Self::ContextBudgetExceeded => write!(f, "context_budget_exceeded"),
        }
    }
}

/// Error from judging a single window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JudgeError {
    /// The capability could not be reached, timed out, or the prompt would not fit.
    #[error("judge invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    /// The capability answered, but not with a usable verdict.
    #[error("judge response could not be parsed: {0}")]
    Parse(String),
}

/// What the orchestrator does with a failed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Record the window as undetermined and move on.
    Undetermined,
    /// Stop the analysis and report it as failed.
    AbortRun,
}

impl JudgeError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Parse(_) => Disposition::Undetermined,
            Self::Invocation(_) => Disposition::AbortRun,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::AbortRun
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

impl From<BackendError> for JudgeError {
    fn from(err: BackendError) -> Self {
        Self::Invocation(InvocationError::Backend(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_is_recoverable() {
        let err = JudgeError::parse("expected a JSON object");
        assert_eq!(err.disposition(), Disposition::Undetermined);
        assert!(!err.is_fatal());
    }

    #[test]
    fn timeout_aborts_the_run() {
        let err: JudgeError = BackendError::Timeout("no verdict within 30s".into()).into();
        assert!(err.is_fatal());
        match err {
            JudgeError::Invocation(inner) => assert_eq!(inner.kind(), FailureKind::Timeout),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn budget_exceeded_message_names_the_budget() {
        let err = InvocationError::ContextBudgetExceeded {
            prompt_chars: 9_000,
            budget_chars: 4_000,
            floor: 2,
        };
        assert_eq!(err.kind(), FailureKind::ContextBudgetExceeded);
        assert!(err.to_string().contains("context budget exceeded"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::ContextBudgetExceeded).unwrap();
        assert_eq!(json, "\"context_budget_exceeded\"");
    }
}
