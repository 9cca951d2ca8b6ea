//! Run supply types: one recorded execution of a pipeline and its steps.
//!
//! The JSON shape matches what recording SDKs submit (`name` / `order`);
//! the storage-side spellings `step_name` / `step_order` are accepted too.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::summarizer::{summarize, SummaryParams};

/// Inputs and outputs captured for a single pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(alias = "step_name")]
    pub name: String,
    /// Position in the run. Unique per run; defines the sequence.
    #[serde(alias = "step_order")]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    /// Free-form reasoning the step recorded about its own decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            name: name.into(),
            order,
            description: None,
            inputs: Value::Null,
            outputs: Value::Null,
            reasons: None,
            metrics: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_reasons(mut self, reasons: Value) -> Self {
        self.reasons = Some(reasons);
        self
    }

    pub fn with_metrics(mut self, metrics: Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Copy of this step with every payload passed through the summarizer.
    pub fn summarized(&self, params: SummaryParams) -> StepRecord {
        StepRecord {
            name: self.name.clone(),
            order: self.order,
            description: self.description.clone(),
            inputs: summarize(&self.inputs, params).into_owned(),
            outputs: summarize(&self.outputs, params).into_owned(),
            reasons: self
                .reasons
                .as_ref()
                .map(|r| summarize(r, params).into_owned()),
            metrics: self
                .metrics
                .as_ref()
                .map(|m| summarize(m, params).into_owned()),
        }
    }
}

/// Pipeline-level context shown to the judge alongside every window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub pipeline_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A fully materialized run handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub pipeline_name: String,
    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub pipeline_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Per-run override of the configured summarization sample size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_description: None,
            metadata: None,
            sample_size: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.pipeline_description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn with_step(mut self, step: StepRecord) -> Self {
        self.steps.push(step);
        self
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn context(&self) -> RunContext {
        RunContext {
            pipeline_name: self.pipeline_name.clone(),
            pipeline_description: self.pipeline_description.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Copy of this run with every step payload summarized.
    pub fn summarized(&self, params: SummaryParams) -> PipelineRun {
        PipelineRun {
            steps: self.steps.iter().map(|s| s.summarized(params)).collect(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_sdk_shape() {
        let run = PipelineRun::from_json(
            r#"{
                "pipeline_name": "competitor_selection",
                "metadata": {"product_id": "123"},
                "steps": [
                    {"name": "keyword_gen", "order": 1, "inputs": {"title": "Phone Case"}, "outputs": {"keywords": ["case"]}},
                    {"name": "search", "order": 2, "description": "catalog search"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[1].description.as_deref(), Some("catalog search"));
        assert_eq!(run.steps[1].inputs, Value::Null);
        assert_eq!(run.context().metadata, Some(json!({"product_id": "123"})));
    }

    #[test]
    fn accepts_storage_field_names() {
        let step: StepRecord =
            serde_json::from_value(json!({"step_name": "rank", "step_order": 4})).unwrap();
        assert_eq!(step.name, "rank");
        assert_eq!(step.order, 4);
    }

    #[test]
    fn summarized_run_keeps_small_payloads() {
        let run = PipelineRun::new("p")
            .with_step(StepRecord::new("a", 1).with_outputs(json!({"ok": true})));
        let summarized = run.summarized(SummaryParams::new(100, 10));
        assert_eq!(summarized, run);
    }
}
