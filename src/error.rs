//! Error taxonomy for calculators and pipelines.
//!
//! Construction-time problems (parameters, paths, schema links) are returned as
//! `Result`s and fail fast. Problems while a stage executes are `ExecutionError`s,
//! which never escape a run: the executor turns them into a [`RunStatus`] code.
//!
//! [`RunStatus`]: crate::runtime::RunStatus

use std::path::PathBuf;

use thiserror::Error;

use crate::data::dataset::DatasetError;
use crate::data::table::TableError;
use crate::runtime::state::InvalidTransition;
use crate::stage::StageKind;

/// Invalid stage configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{stage}: parameters must be a mapping, got {found}")]
    NotAMapping { stage: &'static str, found: &'static str },

    #[error("{stage}: unknown parameter '{name}'")]
    UnknownParameter { stage: &'static str, name: String },

    #[error("{stage}: parameter '{name}' must be {expected}")]
    WrongType {
        stage: &'static str,
        name: String,
        expected: &'static str,
    },

    #[error("{stage}: parameter '{name}' out of range: {reason}")]
    OutOfDomain {
        stage: &'static str,
        name: String,
        reason: String,
    },

    #[error("{stage}: missing required parameter '{name}'")]
    MissingRequired { stage: &'static str, name: String },

    #[error("{stage}: parameter '{name}' does not name a readable file: {}", .path.display())]
    MissingFile {
        stage: &'static str,
        name: String,
        path: PathBuf,
    },

    #[error("{stage}: inconsistent parameters: {reason}")]
    Inconsistent { stage: &'static str, reason: String },
}

/// Input/output location problems detected while resolving a calculator's paths.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("{stage}: an input path is required")]
    MissingInput { stage: &'static str },

    #[error("{stage}: input path {} does not exist", .path.display())]
    InputNotFound { stage: &'static str, path: PathBuf },

    #[error("{} is a file but a directory is needed; refusing to overwrite", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("output path {} is an existing directory but a file is needed", .path.display())]
    OutputIsDirectory { path: PathBuf },

    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PathError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PathError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Anything that can go wrong while constructing a calculator.
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("no calculator registered for stage {0}")]
    Unregistered(StageKind),
}

/// A downstream stage expects datasets its upstream stage does not provide.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stage {position} ({downstream}) expects datasets that upstream {upstream} does not provide: {missing:?}")]
pub struct ContractViolation {
    /// Position of the downstream stage in the pipeline.
    pub position: usize,
    pub upstream: StageKind,
    pub downstream: StageKind,
    /// Every expected path absent from the upstream schema, in expected order.
    pub missing: Vec<String>,
}

/// Errors that stop a pipeline from producing a report.
///
/// Everything except `Task` is detected before any stage executes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("invalid pipeline definition: {0}")]
    Definition(#[from] toml::de::Error),

    #[error("cannot read pipeline definition {}: {source}", .path.display())]
    DefinitionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("first stage ({0}) consumes an artifact but the pipeline has no input")]
    MissingInput(StageKind),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Calculator(#[from] CalculatorError),
}

impl From<ConfigurationError> for PipelineError {
    fn from(err: ConfigurationError) -> Self {
        PipelineError::Calculator(err.into())
    }
}

/// Failures of a single external-program run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("executable '{0}' not found on the search path")]
    ExecutableNotFound(String),

    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with status {code}")]
    NonZeroExit { program: String, code: i32 },

    #[error("cannot prepare working directory {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write input deck {}: {source}", .path.display())]
    Deck {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot stage input {} into the working directory: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("raw output file {} is missing", .path.display())]
    MissingOutput { path: PathBuf },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("cannot read upstream artifact {}: {source}", .path.display())]
    UpstreamArtifact {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },

    #[error("output is missing provided datasets: {0:?}")]
    UnfulfilledContract(Vec<String>),

    #[error("cannot prepare output location: {0}")]
    Output(#[from] PathError),

    #[error(transparent)]
    State(#[from] InvalidTransition),
}
