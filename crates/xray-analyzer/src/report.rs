//! Result aggregation: terminal diagnosis state → caller-facing outcome.
//!
//! The outcome is tagged by `status` so that "analysis ran and found
//! nothing" (`analyzed` with a null `faulty_step`) can never be confused with
//! "analysis could not run" (`analysis_failed`).

use serde::{Deserialize, Serialize};

use crate::diagnosis::state::{Conclusion, DiagnosisMachine};
use crate::errors::FailureKind;
use crate::window::RunPlan;

pub const REASON_ALL_CLEAR: &str = "All step transitions appear correct";
pub const REASON_SINGLE_STEP: &str = "Single-step run: no transition to check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    SlidingWindow,
}

/// Per-step health derived from the windows that were judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepHealth {
    /// Covered by at least one window judged consistent.
    Ok,
    /// The faulty step.
    Error,
    /// Only covered by windows whose verdict could not be parsed.
    Undetermined,
    /// Never covered by a window judged consistent.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: String,
    pub order: i64,
    pub status: StepHealth,
    pub note: String,
}

/// Fault report for one analysis invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub faulty_step: Option<String>,
    pub faulty_step_order: Option<i64>,
    pub reason: String,
    /// Empty when the judge gave none; never null.
    pub suggestion: String,
    pub analysis_method: AnalysisMethod,
    pub windows_analyzed: usize,
    pub undetermined_windows: Vec<usize>,
    pub step_statuses: Vec<StepStatus>,
}

/// Detail preserved when the judge could not be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    pub error: String,
    pub failed_window: usize,
    pub windows_analyzed: usize,
}

/// What the caller gets back from one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Analyzed(AnalysisReport),
    AnalysisFailed(AnalysisFailure),
    Cancelled { windows_analyzed: usize },
}

impl AnalysisOutcome {
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            Self::Analyzed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::AnalysisFailed(_))
    }

    pub fn windows_analyzed(&self) -> usize {
        match self {
            Self::Analyzed(r) => r.windows_analyzed,
            Self::AnalysisFailed(f) => f.windows_analyzed,
            Self::Cancelled { windows_analyzed } => *windows_analyzed,
        }
    }

    /// Status label as it appears in the serialized outcome.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Analyzed(_) => "analyzed",
            Self::AnalysisFailed(_) => "analysis_failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Normalize a terminal machine into an outcome.
///
/// Returns `None` if the machine has not reached a terminal state.
pub fn aggregate(machine: &DiagnosisMachine, plan: &RunPlan) -> Option<AnalysisOutcome> {
    let windows_analyzed = machine.windows_analyzed();
    let outcome = match machine.conclusion()? {
        Conclusion::FaultFound { verdict, .. } => AnalysisOutcome::Analyzed(AnalysisReport {
            faulty_step: verdict.faulty_step.clone(),
            faulty_step_order: verdict.faulty_step_order,
            reason: verdict.reason.clone(),
            suggestion: verdict.suggestion.clone(),
            analysis_method: AnalysisMethod::SlidingWindow,
            windows_analyzed,
            undetermined_windows: machine.undetermined_windows().to_vec(),
            step_statuses: step_statuses(machine, plan, verdict.faulty_step_order),
        }),
        Conclusion::Exhausted => AnalysisOutcome::Analyzed(AnalysisReport {
            faulty_step: None,
            faulty_step_order: None,
            reason: exhausted_reason(machine, plan),
            suggestion: String::new(),
            analysis_method: AnalysisMethod::SlidingWindow,
            windows_analyzed,
            undetermined_windows: machine.undetermined_windows().to_vec(),
            step_statuses: step_statuses(machine, plan, None),
        }),
        Conclusion::Failed { window, error } => AnalysisOutcome::AnalysisFailed(AnalysisFailure {
            kind: error.kind(),
            error: error.to_string(),
            failed_window: window,
            windows_analyzed,
        }),
        Conclusion::Cancelled => AnalysisOutcome::Cancelled { windows_analyzed },
    };
    Some(outcome)
}

fn exhausted_reason(machine: &DiagnosisMachine, plan: &RunPlan) -> String {
    if plan.is_degenerate() {
        return REASON_SINGLE_STEP.to_string();
    }
    match machine.undetermined_windows().len() {
        0 => REASON_ALL_CLEAR.to_string(),
        n => format!(
            "No faulty transition found, but {n} of {} window(s) could not be judged",
            machine.total_windows()
        ),
    }
}

fn step_statuses(
    machine: &DiagnosisMachine,
    plan: &RunPlan,
    faulty_order: Option<i64>,
) -> Vec<StepStatus> {
    let windows = plan.windows();
    let covered_by = |indices: &[usize], order: i64| {
        indices
            .iter()
            .filter_map(|&i| windows.get(i))
            .any(|w| w.contains_order(order))
    };

    plan.steps()
        .iter()
        .map(|step| {
            let (status, note) = if faulty_order == Some(step.order) {
                (StepHealth::Error, "First inconsistent step")
            } else if covered_by(machine.clear_windows(), step.order) {
                (StepHealth::Ok, "Transition verified")
            } else if covered_by(machine.undetermined_windows(), step.order) {
                (StepHealth::Undetermined, "Verdict could not be parsed")
            } else if plan.is_degenerate() {
                (StepHealth::Unchecked, "No transition to check")
            } else {
                (StepHealth::Unchecked, "Not reached before early stop")
            };
            StepStatus {
                step: step.name.clone(),
                order: step.order,
                status,
                note: note.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::state::WindowFinding;
    use crate::errors::BackendError;
    use crate::judge::WindowVerdict;
    use crate::model::StepRecord;
    use crate::window::plan;

    fn run_plan(n: i64) -> RunPlan {
        let steps: Vec<_> = (1..=n).map(|o| StepRecord::new(format!("step{o}"), o)).collect();
        plan(&steps, 2).unwrap()
    }

    #[test]
    fn fault_report_carries_verdict_and_statuses() {
        let plan = run_plan(4);
        let mut m = DiagnosisMachine::new(plan.judgeable_windows());
        m.start().unwrap();
        m.record(WindowFinding::from_verdict(WindowVerdict::clear("ok", "")))
            .unwrap();
        m.record(WindowFinding::from_verdict(WindowVerdict::fault(
            "step3", 3, "lost items", "",
        )))
        .unwrap();

        let outcome = aggregate(&m, &plan).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.faulty_step.as_deref(), Some("step3"));
        assert_eq!(report.windows_analyzed, 2);
        assert_eq!(report.suggestion, "");

        let statuses: Vec<StepHealth> = report.step_statuses.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepHealth::Ok,
                StepHealth::Ok,
                StepHealth::Error,
                StepHealth::Unchecked
            ]
        );
    }

    #[test]
    fn single_step_report() {
        let plan = run_plan(1);
        let mut m = DiagnosisMachine::new(plan.judgeable_windows());
        m.start().unwrap();
        let outcome = aggregate(&m, &plan).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.windows_analyzed, 0);
        assert_eq!(report.reason, REASON_SINGLE_STEP);
        assert_eq!(report.step_statuses[0].status, StepHealth::Unchecked);
    }

    #[test]
    fn failure_outcome_serializes_as_analysis_failed() {
        let plan = run_plan(3);
        let mut m = DiagnosisMachine::new(plan.judgeable_windows());
        m.start().unwrap();
        m.record(WindowFinding::InvocationFailed(
            BackendError::Unreachable("connection refused".into()).into(),
        ))
        .unwrap();

        let outcome = aggregate(&m, &plan).unwrap();
        assert!(outcome.is_failed());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "analysis_failed");
        assert_eq!(json["kind"], "unreachable");
        assert_eq!(json["failed_window"], 0);
    }

    #[test]
    fn clean_report_serializes_stable_shape() {
        let plan = run_plan(2);
        let mut m = DiagnosisMachine::new(plan.judgeable_windows());
        m.start().unwrap();
        m.record(WindowFinding::from_verdict(WindowVerdict::clear("fine", "")))
            .unwrap();
        let json = serde_json::to_value(aggregate(&m, &plan).unwrap()).unwrap();
        assert_eq!(json["status"], "analyzed");
        assert_eq!(json["analysis_method"], "sliding_window");
        assert!(json["faulty_step"].is_null());
        assert_eq!(json["suggestion"], "");
        assert_eq!(json["reason"], REASON_ALL_CLEAR);
    }

    #[test]
    fn running_machine_has_no_outcome() {
        let plan = run_plan(3);
        let mut m = DiagnosisMachine::new(plan.judgeable_windows());
        m.start().unwrap();
        assert!(aggregate(&m, &plan).is_none());
    }
}
