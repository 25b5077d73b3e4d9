//! State shared by every concrete calculator.

use std::path::Path;

use super::io::StageIo;
use super::StageKind;
use crate::data::{ParameterInput, ParameterSet};
use crate::error::CalculatorError;

/// Validated parameters, resolved paths and program name of one calculator.
#[derive(Debug, Clone)]
pub struct CalculatorBase {
    pub(crate) parameters: ParameterSet,
    pub(crate) io: StageIo,
    pub(crate) executable: String,
}

impl CalculatorBase {
    /// Validate parameters, then resolve paths against `base_dir` (or the current directory).
    ///
    /// Parameters are checked first so an invalid configuration never
    /// creates output directories.
    pub fn build(
        kind: StageKind,
        base_dir: Option<&Path>,
        parameters: impl Into<ParameterInput>,
        input: Option<&Path>,
        output: Option<&Path>,
        executable: &str,
    ) -> Result<Self, CalculatorError> {
        let parameters = kind.parameter_schema().validate(parameters)?;
        let io = match base_dir {
            Some(base) => StageIo::resolve_in(base, kind, input, output)?,
            None => StageIo::resolve(kind, input, output)?,
        };
        Ok(Self {
            parameters,
            io,
            executable: executable.to_string(),
        })
    }
}
