//! Judging adapter: one bounded prompt in, one structured verdict out.
//!
//! ```text
//! prepare(window)  # build prompt; halve sample size until it fits the budget
//! submit(prompt)   # invoke backend under the timeout, parse the response
//! ```
//!
//! `judge` runs both. The orchestrator calls them separately so it can
//! record the prompt digest before the call goes out.

pub mod backend;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{JudgeConfig, SummaryConfig};
use crate::errors::{BackendError, InvocationError, JudgeError};
use crate::model::RunContext;
use crate::summarizer::SummaryParams;
use crate::window::AnalysisWindow;

pub use backend::{JudgeBackend, OpenAiJudge};
pub use parse::parse_verdict;
pub use prompt::{build_window_prompt, JudgePrompt};

/// The judge's finding for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowVerdict {
    /// Name of the faulty step; `None` when the transition is consistent.
    pub faulty_step: Option<String>,
    pub faulty_step_order: Option<i64>,
    pub reason: String,
    pub suggestion: String,
}

impl WindowVerdict {
    pub fn clear(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            faulty_step: None,
            faulty_step_order: None,
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn fault(
        step: impl Into<String>,
        order: i64,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            faulty_step: Some(step.into()),
            faulty_step_order: Some(order),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.faulty_step.is_some()
    }
}

/// A prompt that fits the context budget, with the params that made it fit.
#[derive(Debug, Clone)]
pub struct BoundedPrompt {
    pub prompt: JudgePrompt,
    pub params: SummaryParams,
    /// How many times the sample size was halved to get here.
    pub reductions: u32,
}

/// Wraps calls to a `JudgeBackend` with budgeting, timeout and parsing.
#[derive(Clone)]
pub struct JudgingAdapter {
    backend: Arc<dyn JudgeBackend>,
    judge: JudgeConfig,
    min_sample_size: usize,
}

impl JudgingAdapter {
    pub fn new(backend: Arc<dyn JudgeBackend>, judge: JudgeConfig, summary: &SummaryConfig) -> Self {
        Self {
            backend,
            judge,
            min_sample_size: summary.min_sample_size.max(1),
        }
    }

    /// Build the prompt for `window`, re-summarizing more aggressively until
    /// it fits `context_budget_chars`.
    ///
    /// # Errors
    ///
    /// `ContextBudgetExceeded` if the prompt is still over budget at the
    /// sample floor.
    pub fn prepare(
        &self,
        window: &AnalysisWindow<'_>,
        ctx: &RunContext,
        params: SummaryParams,
    ) -> Result<BoundedPrompt, InvocationError> {
        let budget = self.judge.context_budget_chars;
        let mut params = params;
        let mut reductions = 0;
        loop {
            let prompt = build_window_prompt(window, ctx, params);
            let size = prompt.char_len();
            if size <= budget {
                debug!(window = window.index, chars = size, reductions, "prompt within budget");
                return Ok(BoundedPrompt {
                    prompt,
                    params,
                    reductions,
                });
            }

            if params.sample_size <= self.min_sample_size {
                return Err(InvocationError::ContextBudgetExceeded {
                    prompt_chars: size,
                    budget_chars: budget,
                    floor: self.min_sample_size,
                });
            }
            let halved = params.halved();
            let next = SummaryParams {
                sample_size: halved.sample_size.max(self.min_sample_size),
                ..halved
            };
            warn!(
                window = window.index,
                chars = size,
                budget,
                sample_size = next.sample_size,
                "prompt over budget; re-summarizing"
            );
            params = next;
            reductions += 1;
        }
    }

    /// Send a prepared prompt and parse the verdict.
    pub async fn submit(
        &self,
        window: &AnalysisWindow<'_>,
        bounded: &BoundedPrompt,
    ) -> Result<WindowVerdict, JudgeError> {
        let timeout = self.judge.invocation_timeout();
        let raw = match tokio::time::timeout(timeout, self.backend.invoke(&bounded.prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::Timeout(format!("no verdict within {timeout:?}")).into())
            }
        };
        parse_verdict(&raw, window)
    }

    /// `prepare` then `submit`.
    pub async fn judge(
        &self,
        window: &AnalysisWindow<'_>,
        ctx: &RunContext,
        params: SummaryParams,
    ) -> Result<WindowVerdict, JudgeError> {
        if window.is_degenerate() {
            return Ok(WindowVerdict::clear("no transition to check", ""));
        }
        let bounded = self.prepare(window, ctx, params)?;
        self.submit(window, &bounded).await
    }
}

#[cfg(test)]
mod tests {
    use super::backend::MockJudgeBackend;
    use super::*;
    use crate::model::StepRecord;
    use crate::window::plan;
    use serde_json::json;

    fn adapter(backend: MockJudgeBackend, budget: usize) -> JudgingAdapter {
        let judge = JudgeConfig {
            context_budget_chars: budget,
            ..JudgeConfig::default()
        };
        JudgingAdapter::new(Arc::new(backend), judge, &SummaryConfig::default())
    }

    fn ctx() -> RunContext {
        RunContext {
            pipeline_name: "p".into(),
            ..RunContext::default()
        }
    }

    fn big_steps() -> Vec<StepRecord> {
        let items: Vec<_> = (0..400).map(|i| json!({"id": i, "title": format!("item {i}")})).collect();
        vec![
            StepRecord::new("search", 1).with_outputs(json!(items)),
            StepRecord::new("filter", 2).with_inputs(json!(items)),
        ]
    }

    #[tokio::test]
    async fn judge_parses_backend_response() {
        let mut backend = MockJudgeBackend::new();
        backend.expect_invoke().times(1).returning(|_| {
            Ok(r#"{"faulty_step": "filter", "faulty_step_order": 2, "reason": "dropped everything", "suggestion": ""}"#.to_string())
        });
        let adapter = adapter(backend, 240_000);
        let steps = vec![StepRecord::new("search", 1), StepRecord::new("filter", 2)];
        let plan = plan(&steps, 2).unwrap();

        let verdict = adapter
            .judge(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100))
            .await
            .unwrap();
        assert_eq!(verdict.faulty_step_order, Some(2));
    }

    #[tokio::test]
    async fn degenerate_window_never_calls_backend() {
        let mut backend = MockJudgeBackend::new();
        backend.expect_invoke().times(0);
        let adapter = adapter(backend, 240_000);
        let steps = vec![StepRecord::new("only", 1)];
        let plan = plan(&steps, 2).unwrap();

        let verdict = adapter
            .judge(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100))
            .await
            .unwrap();
        assert!(!verdict.is_fault());
    }

    #[test]
    fn over_budget_prompt_is_resummarized() {
        let adapter = adapter(MockJudgeBackend::new(), 6_000);
        let steps = big_steps();
        let plan = plan(&steps, 2).unwrap();

        let bounded = adapter
            .prepare(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100))
            .unwrap();
        assert!(bounded.reductions > 0);
        assert!(bounded.prompt.char_len() <= 6_000);
        assert!(bounded.params.sample_size < 100);
    }

    #[test]
    fn budget_below_system_prompt_fails_at_floor() {
        let adapter = adapter(MockJudgeBackend::new(), 100);
        let steps = big_steps();
        let plan = plan(&steps, 2).unwrap();

        let err = adapter
            .prepare(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100))
            .unwrap_err();
        assert!(matches!(err, InvocationError::ContextBudgetExceeded { floor: 2, .. }));
    }

    #[test]
    fn prompt_that_fits_only_at_the_floor_is_accepted() {
        let long = "x".repeat(50_000);
        let steps = vec![
            StepRecord::new("extract", 1).with_outputs(json!(long)),
            StepRecord::new("classify", 2).with_inputs(json!(long)),
        ];
        let plan = plan(&steps, 2).unwrap();
        let window = plan.windows()[0];
        let at_floor = build_window_prompt(&window, &ctx(), SummaryParams::new(312, 2)).char_len();
        let one_above = build_window_prompt(&window, &ctx(), SummaryParams::new(312, 3)).char_len();
        assert!(one_above > at_floor);

        let adapter = adapter(MockJudgeBackend::new(), at_floor);
        let bounded = adapter
            .prepare(&window, &ctx(), SummaryParams::new(20_000, 100))
            .unwrap();
        assert_eq!(bounded.params.sample_size, 2);
        assert_eq!(bounded.prompt.char_len(), at_floor);

        let tighter = JudgingAdapter::new(
            Arc::new(MockJudgeBackend::new()),
            JudgeConfig {
                context_budget_chars: at_floor - 1,
                ..JudgeConfig::default()
            },
            &SummaryConfig::default(),
        );
        let err = tighter
            .prepare(&window, &ctx(), SummaryParams::new(20_000, 100))
            .unwrap_err();
        assert_eq!(
            err,
            InvocationError::ContextBudgetExceeded {
                prompt_chars: at_floor,
                budget_chars: at_floor - 1,
                floor: 2,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        struct Stalled;

        #[async_trait::async_trait]
        impl JudgeBackend for Stalled {
            async fn invoke(&self, _prompt: &JudgePrompt) -> Result<String, BackendError> {
                std::future::pending().await
            }
        }

        let judge = JudgeConfig {
            invocation_timeout_secs: 5,
            ..JudgeConfig::default()
        };
        let adapter = JudgingAdapter::new(Arc::new(Stalled), judge, &SummaryConfig::default());
        let steps = vec![StepRecord::new("a", 1), StepRecord::new("b", 2)];
        let plan = plan(&steps, 2).unwrap();

        let err = adapter
            .judge(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("timed out"));
    }
}
