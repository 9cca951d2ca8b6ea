//! Analyzer configuration: summarization, judging and backend settings.
//!
//! The engine receives an `AnalyzerConfig` value at construction and never
//! reads process state itself. Only the binary layers environment overrides
//! on top of the defaults or a TOML file.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variables (`XRAY_API_KEY`, `XRAY_MODEL`, ...)
//! 2. TOML config file passed with `--config`
//! 3. Built-in defaults
//!
//! ## Environment variables
//!
//! | Variable                  | Field                              |
//! |---------------------------|------------------------------------|
//! | `XRAY_API_KEY`            | `backend.api_key`                  |
//! | `XRAY_BASE_URL`           | `backend.base_url`                 |
//! | `XRAY_MODEL`              | `backend.model`                    |
//! | `XRAY_TIMEOUT_SECS`       | `judge.invocation_timeout_secs`    |
//! | `XRAY_CONTEXT_BUDGET`     | `judge.context_budget_chars`       |
//! | `XRAY_THRESHOLD_CHARS`    | `summary.threshold_chars`          |
//! | `XRAY_SAMPLE_SIZE`        | `summary.sample_size`              |
//!
//! `CEREBRAS_API_KEY` / `CEREBRAS_BASE_URL` / `CEREBRAS_MODEL` are honored
//! when the `XRAY_` variant is unset.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::summarizer::SummaryParams;
use crate::window::DEFAULT_WINDOW_WIDTH;

/// ~5K tokens per payload at ~4 chars/token.
const DEFAULT_THRESHOLD_CHARS: usize = 20_000;
const DEFAULT_SAMPLE_SIZE: usize = 100;
const DEFAULT_MIN_SAMPLE_SIZE: usize = 2;
/// 65K-token context minus room for the verdict, at ~4 chars/token.
const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 240_000;
const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 120;

const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";
const DEFAULT_MODEL: &str = "llama-3.3-70b";
const DEFAULT_TEMPERATURE: f64 = 0.1;
const DEFAULT_MAX_TOKENS: u32 = 1_000;

/// Payload summarization knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Payloads whose compact JSON is longer than this are summarized.
    pub threshold_chars: usize,
    /// Items (sequences) or characters per end (strings) kept in a summary.
    pub sample_size: usize,
    /// Floor for the adapter's halving of `sample_size`.
    pub min_sample_size: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            threshold_chars: DEFAULT_THRESHOLD_CHARS,
            sample_size: DEFAULT_SAMPLE_SIZE,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
        }
    }
}

impl SummaryConfig {
    /// Params for one run, honoring its own sample size if it set one.
    pub fn params_for(&self, run_sample_size: Option<usize>) -> SummaryParams {
        let sample_size = run_sample_size
            .unwrap_or(self.sample_size)
            .max(self.min_sample_size);
        SummaryParams::new(self.threshold_chars, sample_size)
    }
}

/// Windowing and per-call limits for the judging adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub window_width: usize,
    /// Maximum prompt size (system + user text) in characters.
    pub context_budget_chars: usize,
    pub invocation_timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            window_width: DEFAULT_WINDOW_WIDTH,
            context_budget_chars: DEFAULT_CONTEXT_BUDGET_CHARS,
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT_SECS,
        }
    }
}

impl JudgeConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

/// OpenAI-compatible chat-completions endpoint used as the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Never written back out when the config is serialized.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Top-level configuration handed to `DiagnosisOrchestrator::new`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub summary: SummaryConfig,
    pub judge: JudgeConfig,
    pub backend: BackendConfig,
}

impl AnalyzerConfig {
    /// Load a TOML file; missing keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k));

        if let Some(key) = first(&["XRAY_API_KEY", "CEREBRAS_API_KEY"]) {
            self.backend.api_key = key;
        }
        if let Some(url) = first(&["XRAY_BASE_URL", "CEREBRAS_BASE_URL"]) {
            self.backend.base_url = url;
        }
        if let Some(model) = first(&["XRAY_MODEL", "CEREBRAS_MODEL"]) {
            self.backend.model = model;
        }
        if let Some(secs) = parse_var(&lookup, "XRAY_TIMEOUT_SECS") {
            self.judge.invocation_timeout_secs = secs;
        }
        if let Some(budget) = parse_var(&lookup, "XRAY_CONTEXT_BUDGET") {
            self.judge.context_budget_chars = budget;
        }
        if let Some(threshold) = parse_var(&lookup, "XRAY_THRESHOLD_CHARS") {
            self.summary.threshold_chars = threshold;
        }
        if let Some(sample) = parse_var(&lookup, "XRAY_SAMPLE_SIZE") {
            self.summary.sample_size = sample;
        }
        self
    }

    /// Validate all sub-configs.
    pub fn validate(&self) -> Result<(), String> {
        if self.summary.threshold_chars == 0 {
            return Err("summary.threshold_chars must be > 0".to_string());
        }
        if self.summary.min_sample_size == 0 {
            return Err("summary.min_sample_size must be > 0".to_string());
        }
        if self.summary.sample_size < self.summary.min_sample_size {
            return Err(format!(
                "summary.sample_size ({}) must be >= summary.min_sample_size ({})",
                self.summary.sample_size, self.summary.min_sample_size
            ));
        }
        if self.judge.window_width < 2 {
            return Err(format!(
                "judge.window_width must be >= 2, got {}",
                self.judge.window_width
            ));
        }
        if self.judge.context_budget_chars == 0 {
            return Err("judge.context_budget_chars must be > 0".to_string());
        }
        if self.judge.invocation_timeout_secs == 0 {
            return Err("judge.invocation_timeout_secs must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(format!(
                "backend.temperature must be in [0, 2], got {}",
                self.backend.temperature
            ));
        }
        if self.backend.max_tokens == 0 {
            return Err("backend.max_tokens must be > 0".to_string());
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_validates() {
        let cfg = AnalyzerConfig::default();
        cfg.validate().expect("default config should be valid");
        assert_eq!(cfg.judge.window_width, 2);
        assert_eq!(cfg.judge.invocation_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn overrides_apply_and_prefer_xray_names() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("XRAY_API_KEY", "xray-key"),
            ("CEREBRAS_API_KEY", "cerebras-key"),
            ("CEREBRAS_MODEL", "llama-test"),
            ("XRAY_SAMPLE_SIZE", "40"),
            ("XRAY_TIMEOUT_SECS", "not-a-number"),
        ]);
        let cfg = AnalyzerConfig::default()
            .with_overrides_from(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.backend.api_key, "xray-key");
        assert_eq!(cfg.backend.model, "llama-test");
        assert_eq!(cfg.summary.sample_size, 40);
        assert_eq!(cfg.judge.invocation_timeout_secs, 120);
    }

    #[test]
    fn sample_size_below_floor_rejected() {
        let mut cfg = AnalyzerConfig::default();
        cfg.summary.sample_size = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn window_width_below_two_rejected() {
        let mut cfg = AnalyzerConfig::default();
        cfg.judge.window_width = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn run_sample_size_is_clamped_to_floor() {
        let cfg = SummaryConfig::default();
        assert_eq!(cfg.params_for(Some(20)).sample_size, 20);
        assert_eq!(cfg.params_for(Some(0)).sample_size, 2);
        assert_eq!(cfg.params_for(None).sample_size, 100);
    }

    #[test]
    fn partial_toml_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[summary]\nthreshold_chars = 80000\n\n[backend]\nmodel = \"llama-3.1-8b\""
        )
        .unwrap();
        let cfg = AnalyzerConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.summary.threshold_chars, 80_000);
        assert_eq!(cfg.summary.sample_size, 100);
        assert_eq!(cfg.backend.model, "llama-3.1-8b");
        assert_eq!(cfg.backend.base_url, "https://api.cerebras.ai/v1");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AnalyzerConfig::from_toml_file(Path::new("/nonexistent/xray.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
