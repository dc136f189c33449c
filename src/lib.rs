pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;

pub use config::EtlConfig;
pub use error::{EtlError, Result};
pub use pipeline::{run_pipeline, CancelFlag, RunResult, RunStatus};
