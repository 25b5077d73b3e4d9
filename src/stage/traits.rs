//! Calculator trait and stage type tags.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::io::StageIo;
use super::{analyzer, diffractor, interactor, propagator, source};
use crate::data::{DataSchema, Dataset, ParameterSchema, ParameterSet};
use crate::error::ExecutionError;
use crate::runtime::{ProcessRunner, RunReport};

/// Identifier for a stage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Photon source generation.
    Source,
    /// Beam propagation through the beamline.
    Propagator,
    /// Photon-matter interaction.
    Interactor,
    /// Diffraction pattern synthesis.
    Diffractor,
    /// Orientation and phasing of diffraction data.
    Analyzer,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Source,
        StageKind::Propagator,
        StageKind::Interactor,
        StageKind::Diffractor,
        StageKind::Analyzer,
    ];

    /// Get the string name of this stage.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Propagator => "propagator",
            StageKind::Interactor => "interactor",
            StageKind::Diffractor => "diffractor",
            StageKind::Analyzer => "analyzer",
        }
    }

    /// Data contract shared by every calculator of this type.
    pub fn schema(&self) -> &'static DataSchema {
        match self {
            StageKind::Source => &*source::SCHEMA,
            StageKind::Propagator => &*propagator::SCHEMA,
            StageKind::Interactor => &*interactor::SCHEMA,
            StageKind::Diffractor => &*diffractor::SCHEMA,
            StageKind::Analyzer => &*analyzer::SCHEMA,
        }
    }

    pub fn parameter_schema(&self) -> &'static ParameterSchema {
        match self {
            StageKind::Source => &source::PARAMETERS,
            StageKind::Propagator => &propagator::PARAMETERS,
            StageKind::Interactor => &interactor::PARAMETERS,
            StageKind::Diffractor => &diffractor::PARAMETERS,
            StageKind::Analyzer => &analyzer::PARAMETERS,
        }
    }

    /// Whether the stage reads an upstream artifact. Only the source does not.
    pub fn consumes_artifact(&self) -> bool {
        !matches!(self, StageKind::Source)
    }

    /// Subdirectory used for default output locations.
    pub fn output_dir(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Propagator => "prop",
            StageKind::Interactor => "pmi",
            StageKind::Diffractor => "diffr",
            StageKind::Analyzer => "analysis",
        }
    }

    /// Numbered artifact file name, e.g. `pmi_out_0000001.json`.
    pub fn output_file_name(&self, index: usize) -> String {
        format!("{}_out_{:07}.json", self.output_dir(), index)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One pipeline step wrapping one external simulation program.
///
/// Implementations are constructed fully validated: parameters checked against
/// [`StageKind::parameter_schema`] and paths resolved by [`StageIo`]. The
/// generic lifecycle (working directory, deck, launch, emission) lives in
/// [`ProcessRunner`]; a calculator only describes its program.
pub trait Calculator: Send + Sync {
    /// Get the stage type.
    fn kind(&self) -> StageKind;

    fn parameters(&self) -> &ParameterSet;

    fn io(&self) -> &StageIo;

    /// Program name looked up on the search path.
    fn executable(&self) -> &str;

    /// File name of the input deck inside the working directory.
    fn deck_name(&self) -> &'static str;

    /// Serialize the parameters in the program's input format.
    fn write_deck(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Name under which the job input is copied into the working directory.
    fn staged_input_name(&self) -> &'static str;

    /// Parse the raw files left in `workdir` into this stage's own datasets.
    fn collect_output(&self, workdir: &Path) -> Result<Dataset, ExecutionError>;

    fn schema(&self) -> &'static DataSchema {
        self.kind().schema()
    }

    /// Datasets that must be present on input.
    fn expected_data(&self) -> &[String] {
        self.schema().expected()
    }

    /// Datasets that will be present on output.
    fn provided_data(&self) -> &[String] {
        self.schema().provided()
    }

    /// Get the stage name.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn run_with(&self, runner: &ProcessRunner) -> RunReport {
        runner.run(self)
    }

    /// Run with the default runtime and return the integer status (0 on success).
    fn backengine(&self) -> i32 {
        self.run_with(&ProcessRunner::default()).code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_is_self_consistent() {
        for kind in StageKind::ALL {
            assert!(kind.schema().is_self_consistent(), "{kind} schema");
            assert_eq!(kind.parameter_schema().stage, kind.name());
        }
    }

    #[test]
    fn test_default_chain_is_compatible() {
        for pair in StageKind::ALL.windows(2) {
            let missing = pair[1].schema().missing_from(pair[0].schema());
            assert!(missing.is_empty(), "{} -> {}: {:?}", pair[0], pair[1], missing);
        }
    }

    #[test]
    fn test_output_names() {
        assert_eq!(StageKind::Interactor.output_file_name(1), "pmi_out_0000001.json");
        assert_eq!(StageKind::Propagator.output_file_name(12), "prop_out_0000012.json");
        assert!(!StageKind::Source.consumes_artifact());
        assert!(StageKind::Analyzer.consumes_artifact());
    }
}
