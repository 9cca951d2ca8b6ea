//! Diagnosis: the per-run state machine and the orchestrator that drives it.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{analyze_batch, DiagnosisOrchestrator, TracedDiagnosis, WindowTrace};
pub use state::{
    Conclusion, DiagnosisMachine, DiagnosisState, IllegalTransition, TransitionRecord,
    WindowFinding,
};
