//! Diagnosis state machine: explicit states and legal transition guards.
//!
//! ```text
//! Pending → Analyzing(0) → Analyzing(1) → … → Exhausted
//!              │                │
//!              ├→ FaultFound    ├→ FaultFound
//!              ├→ Failed        ├→ Failed
//!              └→ Cancelled     └→ Cancelled
//! Pending → Exhausted   (no judgeable windows)
//! Pending → Cancelled
//! ```
//!
//! The machine does no I/O. The orchestrator feeds it one `WindowFinding`
//! per judged window and reads the `Conclusion` once it is terminal, so the
//! early-stop and cancellation rules can be tested on their own.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::InvocationError;
use crate::judge::WindowVerdict;

/// Where the analysis of one run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "window")]
pub enum DiagnosisState {
    /// Nothing judged yet.
    Pending,
    /// Window `i` is next (or in flight).
    Analyzing(usize),
    /// A window named a faulty step. Terminal.
    FaultFound,
    /// Every window judged without a fault. Terminal.
    Exhausted,
    /// The judge could not be invoked. Terminal.
    Failed,
    /// Caller cancelled between windows. Terminal.
    Cancelled,
}

impl DiagnosisState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FaultFound | Self::Exhausted | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for DiagnosisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Analyzing(i) => write!(f, "Analyzing({i})"),
            Self::FaultFound => write!(f, "FaultFound"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

fn is_legal_transition(from: DiagnosisState, to: DiagnosisState, total: usize) -> bool {
    use DiagnosisState::*;

    match (from, to) {
        (Pending, Analyzing(0)) => total > 0,
        (Pending, Exhausted) => total == 0,
        (Pending, Cancelled) => true,
        (Analyzing(i), Analyzing(j)) => j == i + 1 && j < total,
        (Analyzing(i), Exhausted) => i + 1 == total,
        (Analyzing(_), FaultFound | Failed | Cancelled) => true,
        _ => false,
    }
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: DiagnosisState,
    pub to: DiagnosisState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal diagnosis transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DiagnosisState,
    pub to: DiagnosisState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What judging one window produced.
#[derive(Debug, Clone)]
pub enum WindowFinding {
    /// Verdict names a faulty step.
    Fault(WindowVerdict),
    /// Verdict says the transition is consistent.
    Clear(WindowVerdict),
    /// The response could not be parsed.
    Undetermined { detail: String },
    /// The judge could not be invoked at all.
    InvocationFailed(InvocationError),
}

impl WindowFinding {
    pub fn from_verdict(verdict: WindowVerdict) -> Self {
        if verdict.is_fault() {
            Self::Fault(verdict)
        } else {
            Self::Clear(verdict)
        }
    }
}

/// Terminal result read off a finished machine.
#[derive(Debug, Clone, Copy)]
pub enum Conclusion<'a> {
    FaultFound {
        window: usize,
        verdict: &'a WindowVerdict,
    },
    Exhausted,
    Failed {
        window: usize,
        error: &'a InvocationError,
    },
    Cancelled,
}

/// Tracks one run's window cursor and everything learned so far.
#[derive(Debug, Clone)]
pub struct DiagnosisMachine {
    current: DiagnosisState,
    total_windows: usize,
    windows_analyzed: usize,
    clear_windows: Vec<usize>,
    undetermined_windows: Vec<usize>,
    fault: Option<(usize, WindowVerdict)>,
    failure: Option<(usize, InvocationError)>,
    transitions: Vec<TransitionRecord>,
}

impl DiagnosisMachine {
    /// Create a machine for a run with `total_windows` judgeable windows.
    pub fn new(total_windows: usize) -> Self {
        Self {
            current: DiagnosisState::Pending,
            total_windows,
            windows_analyzed: 0,
            clear_windows: Vec::new(),
            undetermined_windows: Vec::new(),
            fault: None,
            failure: None,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> DiagnosisState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn total_windows(&self) -> usize {
        self.total_windows
    }

    /// Windows whose finding has been recorded.
    pub fn windows_analyzed(&self) -> usize {
        self.windows_analyzed
    }

    pub fn clear_windows(&self) -> &[usize] {
        &self.clear_windows
    }

    pub fn undetermined_windows(&self) -> &[usize] {
        &self.undetermined_windows
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Index of the window to judge next, if any.
    pub fn next_window(&self) -> Option<usize> {
        match self.current {
            DiagnosisState::Analyzing(i) => Some(i),
            _ => None,
        }
    }

    /// `Pending → Analyzing(0)`, or straight to `Exhausted` with nothing to judge.
    pub fn start(&mut self) -> Result<(), IllegalTransition> {
        if self.total_windows == 0 {
            self.advance(DiagnosisState::Exhausted, Some("no transition to check"))
        } else {
            self.advance(DiagnosisState::Analyzing(0), None)
        }
    }

    /// Record the finding for the current window and move on.
    pub fn record(&mut self, finding: WindowFinding) -> Result<(), IllegalTransition> {
        let DiagnosisState::Analyzing(i) = self.current else {
            return Err(IllegalTransition {
                from: self.current,
                to: self.current,
            });
        };
        match finding {
            WindowFinding::Fault(verdict) => {
                let reason = format!(
                    "window {i} names step {}",
                    verdict.faulty_step.as_deref().unwrap_or_default()
                );
                self.advance(DiagnosisState::FaultFound, Some(&reason))?;
                self.fault = Some((i, verdict));
            }
            WindowFinding::Clear(_) => {
                self.advance_past(i, None)?;
                self.clear_windows.push(i);
            }
            WindowFinding::Undetermined { detail } => {
                self.advance_past(i, Some(&detail))?;
                self.undetermined_windows.push(i);
            }
            WindowFinding::InvocationFailed(error) => {
                self.advance(DiagnosisState::Failed, Some(&error.to_string()))?;
                self.failure = Some((i, error));
            }
        }
        self.windows_analyzed += 1;
        Ok(())
    }

    /// Stop before the next window.
    pub fn cancel(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(DiagnosisState::Cancelled, Some(reason))
    }

    /// The terminal result, or `None` while the machine is still running.
    pub fn conclusion(&self) -> Option<Conclusion<'_>> {
        match self.current {
            DiagnosisState::FaultFound => self
                .fault
                .as_ref()
                .map(|(window, verdict)| Conclusion::FaultFound {
                    window: *window,
                    verdict,
                }),
            DiagnosisState::Exhausted => Some(Conclusion::Exhausted),
            DiagnosisState::Failed => self
                .failure
                .as_ref()
                .map(|(window, error)| Conclusion::Failed {
                    window: *window,
                    error,
                }),
            DiagnosisState::Cancelled => Some(Conclusion::Cancelled),
            DiagnosisState::Pending | DiagnosisState::Analyzing(_) => None,
        }
    }

    fn advance_past(&mut self, i: usize, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if i + 1 < self.total_windows {
            self.advance(DiagnosisState::Analyzing(i + 1), reason)
        } else {
            self.advance(DiagnosisState::Exhausted, reason)
        }
    }

    fn advance(&mut self, to: DiagnosisState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to, self.total_windows) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, "diagnosis transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }
}
