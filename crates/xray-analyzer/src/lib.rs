//! X-Ray analyzer: locate the first faulty step of a recorded pipeline run.
//!
//! A run is a sequence of steps with inputs and outputs. The analyzer slides
//! a window over adjacent steps, asks a judge whether each transition is
//! consistent, and stops at the first window that names a faulty step.
//!
//! ```text
//! PipelineRun → window::plan → DiagnosisOrchestrator ─┬→ judge::JudgingAdapter → JudgeBackend
//!                                                     └→ report::aggregate → AnalysisOutcome
//! ```
//!
//! Large payloads are reduced by [`summarizer`] before they reach a prompt.

pub mod config;
pub mod diagnosis;
pub mod errors;
pub mod judge;
pub mod model;
pub mod report;
pub mod summarizer;
pub mod window;

pub use config::AnalyzerConfig;
pub use diagnosis::{analyze_batch, DiagnosisOrchestrator, TracedDiagnosis};
pub use errors::{AnalysisError, BackendError, FailureKind, InvocationError, JudgeError};
pub use judge::{JudgeBackend, JudgePrompt, OpenAiJudge, WindowVerdict};
pub use model::{PipelineRun, StepRecord};
pub use report::{AnalysisOutcome, AnalysisReport, StepHealth};
