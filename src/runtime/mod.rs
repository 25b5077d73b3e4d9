//! Execution runtime: process launching, run lifecycle and pipelines.

pub mod config;
pub mod executor;
pub mod pipeline;
pub mod process;
pub mod state;

pub use config::{RuntimeConfig, RuntimeConfigError};
pub use executor::ProcessRunner;
pub use pipeline::{FailurePolicy, Pipeline, PipelineReport, StageOutcome, StagePlan};
pub use process::{ProcessLauncher, SystemLauncher};
pub use state::{InvalidTransition, JobReport, RunReport, RunState, RunStatus, StateTracker};
