//! Run lifecycle states, status codes and reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::data::DatasetError;
use crate::error::ExecutionError;
use crate::stage::StageKind;

/// Lifecycle of one external-program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Constructed,
    /// Output location prepared.
    Ready,
    /// Working directory populated and program launched.
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Constructed, Ready) | (Ready, Running) | (Running, Succeeded) | (Constructed | Ready | Running, Failed)
        )
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal run state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Tracks the state of one job and rejects illegal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTracker {
    state: RunState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: RunState::Constructed,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer status of a run, 0 on success.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Run succeeded.
    Ok = 0,
    /// Program not found on the search path.
    ExecutableNotFound = 1,
    /// Program could not be started.
    LaunchFailed = 2,
    /// Program exited with a nonzero status.
    NonZeroExit = 3,
    /// Working directory, deck or staged input could not be prepared.
    Workspace = 4,
    /// An expected raw output file is absent.
    MissingOutput = 5,
    /// A raw output file or dataset could not be parsed.
    MalformedOutput = 6,
    /// The upstream artifact could not be read.
    UpstreamArtifact = 7,
    /// The emitted artifact lacks provided datasets.
    UnfulfilledContract = 8,
    /// The output location could not be prepared or written.
    OutputLocation = 9,
    /// Internal lifecycle error.
    InvalidState = 10,
    /// Stage was never run.
    NotRun = 11,
}

impl RunStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == RunStatus::Ok
    }
}

impl From<&ExecutionError> for RunStatus {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::ExecutableNotFound(_) => RunStatus::ExecutableNotFound,
            ExecutionError::Spawn { .. } => RunStatus::LaunchFailed,
            ExecutionError::NonZeroExit { .. } => RunStatus::NonZeroExit,
            ExecutionError::Workspace { .. } | ExecutionError::Deck { .. } | ExecutionError::Staging { .. } => {
                RunStatus::Workspace
            }
            ExecutionError::MissingOutput { .. } => RunStatus::MissingOutput,
            ExecutionError::Table(_) => RunStatus::MalformedOutput,
            ExecutionError::Dataset(DatasetError::Io { .. }) => RunStatus::OutputLocation,
            ExecutionError::Dataset(_) => RunStatus::MalformedOutput,
            ExecutionError::UpstreamArtifact { .. } => RunStatus::UpstreamArtifact,
            ExecutionError::UnfulfilledContract(_) => RunStatus::UnfulfilledContract,
            ExecutionError::Output(_) => RunStatus::OutputLocation,
            ExecutionError::State(_) => RunStatus::InvalidState,
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub index: usize,
    pub input: Option<PathBuf>,
    pub output: PathBuf,
    /// Working directory, if it still exists.
    pub workdir: Option<PathBuf>,
    pub state: RunState,
    pub status: RunStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Outcome of one calculator run: one job, or one per input file in directory mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stage: StageKind,
    /// Jobs in input order.
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    /// First nonzero job status, or 0.
    pub fn code(&self) -> i32 {
        self.status().code()
    }

    pub fn status(&self) -> RunStatus {
        self.jobs
            .iter()
            .map(|j| j.status)
            .find(|s| !s.is_success())
            .unwrap_or(RunStatus::Ok)
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| !j.is_success())
    }

    /// Artifacts written by successful jobs.
    pub fn outputs(&self) -> Vec<&Path> {
        self.jobs
            .iter()
            .filter(|j| j.is_success())
            .map(|j| j.output.as_path())
            .collect()
    }
}
