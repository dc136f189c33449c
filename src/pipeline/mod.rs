// Data processing pipeline: extraction, processing, and output loading

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod exclusions;
pub mod ingestion;
pub mod load;
pub mod orchestrator;
pub mod processing;

// Re-export key types and functions from each stage
pub use exclusions::{Exclusion, ExclusionLedger, ReasonCode};
pub use orchestrator::{run_pipeline, RunResult, RunStatus, StepResult};

/// Whole-run cancellation signal shared by the orchestrator and extraction workers
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
