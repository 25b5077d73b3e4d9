//! Diffraction pattern synthesis with SingFEL (`radiationDamageMPI`).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde_json::json;

use super::base::CalculatorBase;
use super::io::StageIo;
use super::layout::{Binding, Field, OutputLayout, RawTable};
use super::traits::{Calculator, StageKind};
use crate::data::{
    DataSchema, Dataset, DefaultValue, ParameterInput, ParameterKind, ParameterSchema, ParameterSet, ParameterSpec,
    TableOptions,
};
use crate::error::{CalculatorError, ExecutionError};

pub const EXECUTABLE: &str = "radiationDamageMPI";
pub const DECK: &str = "singfel.inp";
pub const STAGED_INPUT: &str = "diffr_in.json";

pub static PARAMETERS: ParameterSchema = ParameterSchema::new(
    "diffractor",
    &[
        ParameterSpec::with_default("uniform_rotation", ParameterKind::Bool, DefaultValue::Bool(true)),
        ParameterSpec::with_default("calculate_Compton", ParameterKind::Bool, DefaultValue::Bool(false)),
        ParameterSpec::with_default("slice_interval", ParameterKind::PositiveInt, DefaultValue::Int(100)),
        ParameterSpec::with_default("number_of_slices", ParameterKind::PositiveInt, DefaultValue::Int(2)),
        ParameterSpec::with_default("pmi_start_ID", ParameterKind::PositiveInt, DefaultValue::Int(1)),
        ParameterSpec::with_default("pmi_stop_ID", ParameterKind::PositiveInt, DefaultValue::Int(1)),
        ParameterSpec::with_default(
            "number_of_diffraction_patterns",
            ParameterKind::PositiveInt,
            DefaultValue::Int(1),
        ),
        ParameterSpec::required("beam_parameter_file", ParameterKind::ExistingFile),
        ParameterSpec::required("beam_geometry_file", ParameterKind::ExistingFile),
    ],
)
.with_check(check_snapshot_range);

fn check_snapshot_range(set: &ParameterSet) -> Result<(), String> {
    match (set.get_int("pmi_start_ID"), set.get_int("pmi_stop_ID")) {
        (Some(start), Some(stop)) if start > stop => {
            Err(format!("pmi_start_ID ({}) is after pmi_stop_ID ({})", start, stop))
        }
        _ => Ok(()),
    }
}

pub static SCHEMA: Lazy<DataSchema> = Lazy::new(|| {
    DataSchema::extending(
        &[
            "/data/snp_0000001/r",
            "/data/snp_0000001/potential_index",
            "/params/photonEnergy",
            "/version",
        ],
        &[
            "/data/diffr",
            "/data/angle",
            "/params/geom/detectorDist",
            "/params/geom/pixelWidth",
            "/params/geom/pixelHeight",
            "/info/package_version",
        ],
    )
});

static LAYOUT: OutputLayout = OutputLayout {
    tables: &[
        RawTable {
            file: "diffr.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::new(Field::Whole, "/data/diffr", "photons")],
        },
        RawTable {
            file: "angle.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::new(Field::Whole, "/data/angle", "1")],
        },
        RawTable {
            file: "geom.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Scalar(0), "/params/geom/detectorDist", "m"),
                Binding::new(Field::Scalar(1), "/params/geom/pixelWidth", "m"),
                Binding::new(Field::Scalar(2), "/params/geom/pixelHeight", "m"),
            ],
        },
    ],
    texts: &[],
};

/// Typed form of the SingFEL parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SingFelParameters {
    pub uniform_rotation: bool,
    pub calculate_compton: bool,
    pub slice_interval: i64,
    pub number_of_slices: i64,
    pub pmi_start_id: i64,
    pub pmi_stop_id: i64,
    pub number_of_diffraction_patterns: i64,
    pub beam_parameter_file: PathBuf,
    pub beam_geometry_file: PathBuf,
}

impl SingFelParameters {
    pub fn new(beam_parameter_file: impl Into<PathBuf>, beam_geometry_file: impl Into<PathBuf>) -> Self {
        Self {
            uniform_rotation: true,
            calculate_compton: false,
            slice_interval: 100,
            number_of_slices: 2,
            pmi_start_id: 1,
            pmi_stop_id: 1,
            number_of_diffraction_patterns: 1,
            beam_parameter_file: beam_parameter_file.into(),
            beam_geometry_file: beam_geometry_file.into(),
        }
    }
}

impl From<SingFelParameters> for ParameterInput {
    fn from(p: SingFelParameters) -> Self {
        ParameterInput::Raw(json!({
            "uniform_rotation": p.uniform_rotation,
            "calculate_Compton": p.calculate_compton,
            "slice_interval": p.slice_interval,
            "number_of_slices": p.number_of_slices,
            "pmi_start_ID": p.pmi_start_id,
            "pmi_stop_ID": p.pmi_stop_id,
            "number_of_diffraction_patterns": p.number_of_diffraction_patterns,
            "beam_parameter_file": p.beam_parameter_file.display().to_string(),
            "beam_geometry_file": p.beam_geometry_file.display().to_string(),
        }))
    }
}

/// Calculator for single-particle diffraction patterns.
#[derive(Debug, Clone)]
pub struct SingFelCalculator {
    base: CalculatorBase,
}

impl SingFelCalculator {
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
        let base = CalculatorBase::build(StageKind::Diffractor, base_dir, parameters, input, output, EXECUTABLE)?;
        Ok(Self { base })
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.base.executable = program.into();
        self
    }
}

impl Calculator for SingFelCalculator {
    fn kind(&self) -> StageKind {
        StageKind::Diffractor
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
        writeln!(out, "input_dir = {}", STAGED_INPUT)?;
        self.base.parameters.write_key_value(out, " = ", true)
    }

    fn staged_input_name(&self) -> &'static str {
        STAGED_INPUT
    }

    fn collect_output(&self, workdir: &Path) -> Result<Dataset, ExecutionError> {
        let mut data = Dataset::new();
        LAYOUT.collect(workdir, &mut data)?;
        data.insert("/info/package_version", "SingFEL", None)?;
        Ok(data)
    }
}
