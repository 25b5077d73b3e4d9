//! simexrs - calculator contract and pipeline composition for XFEL start-to-end simulations.
//!
//! This crate chains independently developed simulation programs (photon
//! source, beam propagation, photon-matter interaction, diffraction and
//! analysis) into a validated, reproducible pipeline:
//!
//! - Parameters validated against per-stage schemas at construction
//! - Declared expected/provided dataset paths checked before anything runs
//! - Each external program run in its own working directory
//! - Directory inputs fanned out over an optional rayon worker pool
//! - Async driver on tokio for callers that cannot block
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Pipeline (plan + driver)       │
//! │  contract check, FailurePolicy      │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │           Stage System              │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ Registry  │  │  Calculator   │  │
//! │  │ (by kind) │  │ (Trait-based) │  │
//! │  └───────────┘  └───────────────┘  │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │             Runtime                 │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ Process   │  │  Launcher     │  │
//! │  │ Runner    │  │ (PATH search) │  │
//! │  └───────────┘  └───────────────┘  │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//!     working dir: deck, staged input, raw tables
//!                   │
//!                   ▼
//!     dataset artifact (.json) for the next stage
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use simexrs::{Pipeline, ProcessRunner, RuntimeConfig, StageKind, StagePlan};
//! use simexrs::data::ParameterInput;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! simexrs::logging::init();
//! let pipeline = Pipeline::new()
//!     .stage(StagePlan::new(StageKind::Source, ParameterInput::Empty)?)
//!     .stage(StagePlan::new(StageKind::Propagator, ParameterInput::Empty)?);
//!
//! let runner = ProcessRunner::new(RuntimeConfig::from_env()?);
//! let report = pipeline.run(&runner)?;
//! std::process::exit(report.code());
//! # }
//! ```

pub mod data;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod stage;

// Re-export commonly used items
pub use data::{DataSchema, Dataset, ParameterSet};
pub use error::{CalculatorError, ConfigurationError, ContractViolation, ExecutionError, PathError, PipelineError};
pub use runtime::{
    FailurePolicy, Pipeline, PipelineReport, ProcessRunner, RunReport, RunState, RunStatus, RuntimeConfig, StagePlan,
};
pub use stage::{Calculator, StageKind, StageRegistry, StageRequest};
