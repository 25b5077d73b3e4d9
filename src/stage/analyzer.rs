//! Orientation recovery and phasing of diffraction patterns.

use std::io::{self, Write};
use std::path::Path;

use once_cell::sync::Lazy;

use super::base::CalculatorBase;
use super::io::StageIo;
use super::layout::{Binding, Field, OutputLayout, RawTable};
use super::traits::{Calculator, StageKind};
use crate::data::{
    DataSchema, Dataset, DefaultValue, ParameterInput, ParameterKind, ParameterSchema, ParameterSet, ParameterSpec,
    TableOptions,
};
use crate::error::{CalculatorError, ExecutionError};

pub const EXECUTABLE: &str = "orient_and_phase";
pub const DECK: &str = "recon.inp";
pub const STAGED_INPUT: &str = "analysis_in.json";

pub static PARAMETERS: ParameterSchema = ParameterSchema::new(
    "analyzer",
    &[
        ParameterSpec::with_default(
            "initial_number_of_quaternions",
            ParameterKind::PositiveInt,
            DefaultValue::Int(1),
        ),
        ParameterSpec::with_default("max_number_of_quaternions", ParameterKind::PositiveInt, DefaultValue::Int(9)),
        ParameterSpec::with_default("number_of_iterations", ParameterKind::PositiveInt, DefaultValue::Int(100)),
        ParameterSpec::with_default("number_of_trials", ParameterKind::PositiveInt, DefaultValue::Int(5)),
        ParameterSpec::with_default("averaging_start", ParameterKind::NonNegativeInt, DefaultValue::Int(15)),
    ],
)
.with_check(check_quaternions);

fn check_quaternions(set: &ParameterSet) -> Result<(), String> {
    match (
        set.get_int("initial_number_of_quaternions"),
        set.get_int("max_number_of_quaternions"),
    ) {
        (Some(initial), Some(max)) if max < initial => Err(format!(
            "max_number_of_quaternions ({}) is below initial_number_of_quaternions ({})",
            max, initial
        )),
        _ => Ok(()),
    }
}

pub static SCHEMA: Lazy<DataSchema> = Lazy::new(|| {
    DataSchema::extending(
        &[
            "/data/diffr",
            "/data/angle",
            "/params/geom/detectorDist",
            "/params/geom/pixelWidth",
            "/version",
        ],
        &[
            "/data/electronDensity",
            "/data/orientations",
            "/misc/error",
            "/info/package_version",
        ],
    )
});

static LAYOUT: OutputLayout = OutputLayout {
    tables: &[
        RawTable {
            file: "electron_density.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::new(Field::Whole, "/data/electronDensity", "1/Angstrom^3")],
        },
        RawTable {
            file: "orientations.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::new(Field::Whole, "/data/orientations", "1")],
        },
        RawTable {
            file: "error.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::new(Field::Whole, "/misc/error", "1")],
        },
    ],
    texts: &[],
};

/// Calculator for orientation and phasing.
#[derive(Debug, Clone)]
pub struct OrientAndPhaseCalculator {
    base: CalculatorBase,
}

impl OrientAndPhaseCalculator {
    pub fn new(
        parameters: impl Into<ParameterInput>,
        input: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<Self, CalculatorError> {
        Self::new_in(None, parameters, input, output)
    }

    pub fn new_in(
        base_dir: Option<&Path>,
        parameters: impl Into<ParameterInput>,
        input: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<Self, CalculatorError> {
        let base = CalculatorBase::build(StageKind::Analyzer, base_dir, parameters, input, output, EXECUTABLE)?;
        Ok(Self { base })
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.base.executable = program.into();
        self
    }
}

impl Calculator for OrientAndPhaseCalculator {
    fn kind(&self) -> StageKind {
        StageKind::Analyzer
    }

    fn parameters(&self) -> &ParameterSet {
        &self.base.parameters
    }

    fn io(&self) -> &StageIo {
        &self.base.io
    }

    fn executable(&self) -> &str {
        &self.base.executable
    }

    fn deck_name(&self) -> &'static str {
        DECK
    }

    fn write_deck(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "input = {}", STAGED_INPUT)?;
        self.base.parameters.write_key_value(out, " = ", false)
    }

    fn staged_input_name(&self) -> &'static str {
        STAGED_INPUT
    }

    fn collect_output(&self, workdir: &Path) -> Result<Dataset, ExecutionError> {
        let mut data = Dataset::new();
        LAYOUT.collect(workdir, &mut data)?;
        data.insert("/info/package_version", "orient_and_phase", None)?;
        Ok(data)
    }
}
