//! Prompt construction for one analysis window.

use serde_json::Value;

use crate::model::{RunContext, StepRecord};
use crate::summarizer::{summarize, SummaryParams};
use crate::window::AnalysisWindow;

/// System prompt shared by every window call.
pub const WINDOW_SYSTEM_PROMPT: &str = r#"You are analyzing a WINDOW of consecutive steps from a multi-step pipeline run.

Check whether the data flows correctly between these steps:
1. Does each step's input follow from the previous step's output?
2. Are there semantic mismatches (e.g. a phone case query producing laptop results)?
3. Was too much or too little data filtered, or did anything get lost or corrupted?
4. Does a step's recorded reasoning, if present, support what it produced?

Large payloads are shown summarized as {"$xray_summary": ..., "head": ..., "tail": ..., "total_count": N}:
head and tail are the first and last items or characters, total_count the true size.
Do not report a summary itself as a defect.

Respond with ONLY a JSON object of this exact shape:
{
  "faulty_step": "<name of the first faulty step in this window, or null if the transition is consistent>",
  "faulty_step_order": <order number of that step, or null>,
  "reason": "<what went wrong, or why the transition looks correct>",
  "suggestion": "<how to fix it, or an empty string>"
}"#;

/// A fully assembled judge prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgePrompt {
    pub system: String,
    pub user: String,
}

impl JudgePrompt {
    /// Size counted against the context budget.
    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }

    /// Hex blake3 digest of the exact prompt text.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.system.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.user.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Build the prompt for `window` with payloads summarized under `params`.
pub fn build_window_prompt(
    window: &AnalysisWindow<'_>,
    ctx: &RunContext,
    params: SummaryParams,
) -> JudgePrompt {
    let mut parts = vec![format!("## Pipeline: {}", ctx.pipeline_name)];
    if let Some(description) = ctx.pipeline_description.as_deref() {
        parts.push(format!("## Description: {description}"));
    }
    if let Some(metadata) = ctx.metadata.as_ref().filter(|m| !m.is_null()) {
        parts.push(format!(
            "## Metadata: {}",
            summarize(metadata, params).as_ref()
        ));
    }
    parts.push(format!("## {window}"));
    parts.push(String::new());

    for step in window.steps {
        render_step(&mut parts, step, params);
    }

    parts.push(
        "Analyze the transition between these steps. Is the data flow correct? \
         Answer with the JSON object only."
            .to_string(),
    );

    JudgePrompt {
        system: WINDOW_SYSTEM_PROMPT.to_string(),
        user: parts.join("\n"),
    }
}

fn render_step(parts: &mut Vec<String>, step: &StepRecord, params: SummaryParams) {
    parts.push(format!("### Step {}: {}", step.order, step.name));
    if let Some(description) = step.description.as_deref() {
        parts.push(format!("**Description:** {description}"));
    }
    parts.push(format!("**Inputs:** {}", render_payload(&step.inputs, params)));
    parts.push(format!("**Outputs:** {}", render_payload(&step.outputs, params)));
    if let Some(reasons) = step.reasons.as_ref() {
        parts.push(format!("**Reasons:** {}", render_payload(reasons, params)));
    }
    if let Some(metrics) = step.metrics.as_ref() {
        parts.push(format!("**Metrics:** {}", render_payload(metrics, params)));
    }
    parts.push(String::new());
}

fn render_payload(payload: &Value, params: SummaryParams) -> String {
    let summarized = summarize(payload, params);
    serde_json::to_string_pretty(summarized.as_ref()).unwrap_or_else(|_| summarized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::plan;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext {
            pipeline_name: "competitor_selection".into(),
            pipeline_description: Some("Find competitor products".into()),
            metadata: Some(json!({"product_id": "123"})),
        }
    }

    #[test]
    fn prompt_names_both_steps_and_payloads() {
        let steps = vec![
            StepRecord::new("keyword_gen", 1)
                .with_description("Generate search keywords")
                .with_outputs(json!({"keywords": ["phone case"]})),
            StepRecord::new("search", 2)
                .with_inputs(json!({"keywords": ["laptop"]}))
                .with_metrics(json!({"latency_ms": 120})),
        ];
        let plan = plan(&steps, 2).unwrap();
        let prompt = build_window_prompt(&plan.windows()[0], &ctx(), SummaryParams::new(20_000, 100));

        assert!(prompt.user.contains("## Pipeline: competitor_selection"));
        assert!(prompt.user.contains("## Description: Find competitor products"));
        assert!(prompt.user.contains("## Window 1: Steps 1 → 2"));
        assert!(prompt.user.contains("### Step 1: keyword_gen"));
        assert!(prompt.user.contains("**Description:** Generate search keywords"));
        assert!(prompt.user.contains("### Step 2: search"));
        assert!(prompt.user.contains("\"laptop\""));
        assert!(prompt.user.contains("**Metrics:**"));
        assert!(!prompt.user.contains("**Reasons:**"));
        assert!(prompt.system.contains("\"faulty_step_order\""));
    }

    #[test]
    fn oversized_payloads_are_summarized_in_the_prompt() {
        let big: Vec<_> = (0..2_000).map(|i| json!({"id": i})).collect();
        let steps = vec![
            StepRecord::new("search", 1).with_outputs(json!(big)),
            StepRecord::new("filter", 2),
        ];
        let plan = plan(&steps, 2).unwrap();
        let prompt = build_window_prompt(&plan.windows()[0], &ctx(), SummaryParams::new(1_000, 10));
        assert!(prompt.user.contains("\"total_count\": 2000"));
        assert!(prompt.char_len() < 5_000);
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = JudgePrompt {
            system: "s".into(),
            user: "u".into(),
        };
        let b = JudgePrompt {
            system: "su".into(),
            user: String::new(),
        };
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
