//! Diagnosis orchestrator: drives planner, adapter and state machine for a run.
//!
//! ## Lifecycle
//!
//! ```text
//! analyze(run)
//!   → plan(steps)                 # EmptyRun / MalformedInput surface here
//!   → machine.start()
//!   → loop while Analyzing(i):
//!       check cancellation        # never start a call after cancel
//!       adapter.prepare(window i) # bounded prompt or budget failure
//!       adapter.submit(...)       # one judge call, awaited under timeout
//!       machine.record(finding)   # early stop on the first fault
//!   → aggregate(machine)
//! ```
//!
//! Windows of one run are judged strictly in order. Separate runs get
//! separate machines, so `analyze_batch` can fan them out without locks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AnalyzerConfig;
use crate::diagnosis::state::{DiagnosisMachine, TransitionRecord, WindowFinding};
use crate::errors::{AnalysisError, JudgeError};
use crate::judge::{BoundedPrompt, JudgeBackend, JudgingAdapter, WindowVerdict};
use crate::model::{PipelineRun, StepRecord};
use crate::report::{aggregate, AnalysisOutcome};
use crate::window::{plan, RunPlan};

/// Reproducibility record for one judged window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTrace {
    pub window: usize,
    pub step_orders: Vec<i64>,
    /// blake3 hex digest of the exact prompt sent.
    pub prompt_digest: String,
    pub prompt_chars: usize,
    pub sample_size: usize,
}

/// Outcome plus the audit trail that produced it.
#[derive(Debug, Clone)]
pub struct TracedDiagnosis {
    pub outcome: AnalysisOutcome,
    pub windows: Vec<WindowTrace>,
    pub transitions: Vec<TransitionRecord>,
}

/// Runs sliding-window fault localization against a judge backend.
#[derive(Clone)]
pub struct DiagnosisOrchestrator {
    config: Arc<AnalyzerConfig>,
    adapter: JudgingAdapter,
}

impl DiagnosisOrchestrator {
    /// # Errors
    ///
    /// `Configuration` if `config.validate()` fails.
    pub fn new(config: AnalyzerConfig, backend: Arc<dyn JudgeBackend>) -> Result<Self, AnalysisError> {
        config.validate().map_err(AnalysisError::Configuration)?;
        let adapter = JudgingAdapter::new(backend, config.judge.clone(), &config.summary);
        Ok(Self {
            config: Arc::new(config),
            adapter,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Validate and order the run's steps into windows.
    pub fn plan(&self, run: &PipelineRun) -> Result<RunPlan, AnalysisError> {
        plan(&run.steps, self.config.judge.window_width)
    }

    /// Analyze one run to completion.
    pub async fn analyze(&self, run: &PipelineRun) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze_with_cancel(run, &CancellationToken::new()).await
    }

    /// Analyze one run, stopping between windows once `cancel` fires.
    pub async fn analyze_with_cancel(
        &self,
        run: &PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        Ok(self.analyze_traced(run, cancel).await?.outcome)
    }

    /// Analyze one run and keep the per-window trace and transition log.
    pub async fn analyze_traced(
        &self,
        run: &PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<TracedDiagnosis, AnalysisError> {
        let plan = self.plan(run)?;
        let windows = plan.windows();
        let ctx = run.context();
        let params = self.config.summary.params_for(run.sample_size);

        info!(
            pipeline = %run.pipeline_name,
            steps = plan.steps().len(),
            windows = plan.judgeable_windows(),
            "analysis starting"
        );

        let mut machine = DiagnosisMachine::new(plan.judgeable_windows());
        let mut traces = Vec::new();
        machine.start()?;

        while let Some(i) = machine.next_window() {
            if cancel.is_cancelled() {
                info!(window = i, "analysis cancelled before window");
                machine.cancel(&format!("cancelled before window {i}"))?;
                break;
            }

            let window = &windows[i];
            let finding = match self.adapter.prepare(window, &ctx, params) {
                Err(e) => WindowFinding::InvocationFailed(e),
                Ok(bounded) => {
                    traces.push(trace_for(i, window.steps, &bounded));
                    let result = self.adapter.submit(window, &bounded).await;
                    if cancel.is_cancelled() {
                        info!(window = i, "analysis cancelled; discarding in-flight verdict");
                        machine.cancel(&format!("cancelled during window {i}"))?;
                        break;
                    }
                    classify(i, result)
                }
            };
            machine.record(finding)?;
        }

        let outcome = aggregate(&machine, &plan)
            .ok_or_else(|| AnalysisError::Incomplete(machine.current().to_string()))?;

        info!(
            pipeline = %run.pipeline_name,
            status = outcome.status(),
            state = %machine.current(),
            windows_analyzed = outcome.windows_analyzed(),
            faulty_step = outcome.report().and_then(|r| r.faulty_step.as_deref()).unwrap_or("-"),
            "analysis finished"
        );

        Ok(TracedDiagnosis {
            outcome,
            windows: traces,
            transitions: machine.transitions().to_vec(),
        })
    }

    /// Build every window's bounded prompt without calling the judge.
    pub fn preview_prompts(
        &self,
        run: &PipelineRun,
    ) -> Result<Vec<(usize, Result<BoundedPrompt, JudgeError>)>, AnalysisError> {
        let plan = self.plan(run)?;
        if plan.is_degenerate() {
            return Ok(Vec::new());
        }
        let ctx = run.context();
        let params = self.config.summary.params_for(run.sample_size);
        Ok(plan
            .windows()
            .iter()
            .map(|w| (w.index, self.adapter.prepare(w, &ctx, params).map_err(JudgeError::from)))
            .collect())
    }
}

fn classify(window: usize, result: Result<WindowVerdict, JudgeError>) -> WindowFinding {
    match result {
        Ok(verdict) => WindowFinding::from_verdict(verdict),
        Err(JudgeError::Parse(detail)) => {
            warn!(window, detail = %detail, "verdict undetermined");
            WindowFinding::Undetermined { detail }
        }
        Err(JudgeError::Invocation(e)) => {
            warn!(window, error = %e, "judge invocation failed; aborting analysis");
            WindowFinding::InvocationFailed(e)
        }
    }
}

fn trace_for(window: usize, steps: &[StepRecord], bounded: &BoundedPrompt) -> WindowTrace {
    WindowTrace {
        window,
        step_orders: steps.iter().map(|s| s.order).collect(),
        prompt_digest: bounded.prompt.digest(),
        prompt_chars: bounded.prompt.char_len(),
        sample_size: bounded.params.sample_size,
    }
}

/// Analyze several runs concurrently, one orchestrator task per run.
///
/// Results come back in the order of `runs`.
pub async fn analyze_batch(
    orchestrator: &DiagnosisOrchestrator,
    runs: Vec<PipelineRun>,
    cancel: &CancellationToken,
) -> Vec<Result<AnalysisOutcome, AnalysisError>> {
    let total = runs.len();
    let mut join_set: JoinSet<(usize, Result<AnalysisOutcome, AnalysisError>)> = JoinSet::new();

    for (index, run) in runs.into_iter().enumerate() {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let result = orchestrator.analyze_with_cancel(&run, &cancel).await;
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<AnalysisOutcome, AnalysisError>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!(error = %e, "analysis task panicked"),
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(AnalysisError::TaskFailed(
                    "task panicked before producing a result".to_string(),
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::backend::MockJudgeBackend;
    use crate::model::StepRecord;
    use serde_json::json;

    fn run(n: i64) -> PipelineRun {
        (1..=n).fold(PipelineRun::new("p"), |run, o| {
            run.with_step(StepRecord::new(format!("s{o}"), o).with_outputs(json!([o])))
        })
    }

    #[test]
    fn preview_builds_every_window_without_calling() {
        let mut backend = MockJudgeBackend::new();
        backend.expect_invoke().times(0);
        let orchestrator =
            DiagnosisOrchestrator::new(AnalyzerConfig::default(), Arc::new(backend)).unwrap();

        let previews = orchestrator.preview_prompts(&run(4)).unwrap();
        let indices: Vec<usize> = previews.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(previews.iter().all(|(_, p)| p.is_ok()));
    }

    #[test]
    fn preview_of_single_step_run_is_empty() {
        let orchestrator =
            DiagnosisOrchestrator::new(AnalyzerConfig::default(), Arc::new(MockJudgeBackend::new()))
                .unwrap();
        assert!(orchestrator.preview_prompts(&run(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn trace_records_one_digest_per_call() {
        let mut backend = MockJudgeBackend::new();
        backend.expect_invoke().times(2).returning(|_| {
            Ok(r#"{"faulty_step": null, "reason": "ok"}"#.to_string())
        });
        let orchestrator =
            DiagnosisOrchestrator::new(AnalyzerConfig::default(), Arc::new(backend)).unwrap();

        let traced = orchestrator
            .analyze_traced(&run(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(traced.windows.len(), 2);
        assert_eq!(traced.windows[1].step_orders, vec![2, 3]);
        assert_eq!(traced.windows[0].prompt_digest.len(), 64);
        assert_ne!(traced.windows[0].prompt_digest, traced.windows[1].prompt_digest);
    }
}
