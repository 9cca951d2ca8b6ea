//! Window planning: split an ordered run into contiguous analysis windows.
//!
//! ```text
//! steps (sorted by order):  s1  s2  s3  s4
//! width 2 windows:          [s1 s2]
//!                               [s2 s3]
//!                                   [s3 s4]
//! ```
//!
//! A single-step run yields one degenerate window that carries no
//! transition; the orchestrator never sends it to the judge.

use std::fmt;

use crate::errors::AnalysisError;
use crate::model::StepRecord;

/// Window width used when none is configured.
pub const DEFAULT_WINDOW_WIDTH: usize = 2;

/// A contiguous slice of the ordered step sequence.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisWindow<'a> {
    /// Zero-based position among the run's windows.
    pub index: usize,
    pub steps: &'a [StepRecord],
}

impl<'a> AnalysisWindow<'a> {
    /// `true` for the single-step window of a one-step run.
    pub fn is_degenerate(&self) -> bool {
        self.steps.len() < 2
    }

    pub fn first(&self) -> &'a StepRecord {
        &self.steps[0]
    }

    pub fn last(&self) -> &'a StepRecord {
        &self.steps[self.steps.len() - 1]
    }

    pub fn step_with_order(&self, order: i64) -> Option<&'a StepRecord> {
        self.steps.iter().find(|s| s.order == order)
    }

    pub fn contains_order(&self, order: i64) -> bool {
        self.step_with_order(order).is_some()
    }
}

impl fmt::Display for AnalysisWindow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_degenerate() {
            write!(f, "Window {}: Step {} (no transition)", self.index + 1, self.first().order)
        } else {
            write!(
                f,
                "Window {}: Steps {} → {}",
                self.index + 1,
                self.first().order,
                self.last().order
            )
        }
    }
}

/// The validated, ordered steps of one run plus the window width.
#[derive(Debug, Clone)]
pub struct RunPlan {
    steps: Vec<StepRecord>,
    width: usize,
}

impl RunPlan {
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// `true` when the run has a single step and nothing to judge.
    pub fn is_degenerate(&self) -> bool {
        self.steps.len() == 1
    }

    /// Number of windows that need a verdict (zero for a degenerate run).
    pub fn judgeable_windows(&self) -> usize {
        if self.is_degenerate() {
            0
        } else {
            self.window_count()
        }
    }

    pub fn window_count(&self) -> usize {
        let n = self.steps.len();
        if n <= self.width {
            1
        } else {
            n - self.width + 1
        }
    }

    /// All windows in ascending order.
    pub fn windows(&self) -> Vec<AnalysisWindow<'_>> {
        if self.steps.len() <= self.width {
            return vec![AnalysisWindow {
                index: 0,
                steps: &self.steps,
            }];
        }
        self.steps
            .windows(self.width)
            .enumerate()
            .map(|(index, steps)| AnalysisWindow { index, steps })
            .collect()
    }
}

/// Order `steps` by `order` and cut them into windows of `width` steps.
///
/// # Errors
///
/// - `EmptyRun` for zero steps.
/// - `MalformedInput` if two steps share an `order` value.
/// - `Configuration` if `width < 2`.
pub fn plan(steps: &[StepRecord], width: usize) -> Result<RunPlan, AnalysisError> {
    if width < 2 {
        return Err(AnalysisError::Configuration(format!(
            "window width must be at least 2, got {width}"
        )));
    }
    if steps.is_empty() {
        return Err(AnalysisError::EmptyRun);
    }

    let mut sorted = steps.to_vec();
    sorted.sort_by_key(|s| s.order);

    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].order == pair[1].order) {
        return Err(AnalysisError::MalformedInput(format!(
            "duplicate step order {}: '{}' and '{}'",
            pair[0].order, pair[0].name, pair[1].name
        )));
    }

    Ok(RunPlan {
        steps: sorted,
        width,
    })
}
