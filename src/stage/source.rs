//! Photon source stage driving `fast2xy`.
//!
//! The program turns a FAST time-dependent field history into a wavefront on a
//! spatial mesh. The stage provides exactly what it declares as expected, so a
//! source artifact can also be re-fed to another source.

use std::io::{self, Write};
use std::path::Path;

use once_cell::sync::Lazy;

use super::base::CalculatorBase;
use super::io::StageIo;
use super::layout::{Binding, Field, OutputLayout, RawTable};
use super::traits::{Calculator, StageKind};
use crate::data::{
    DataSchema, Dataset, DefaultValue, FloatDomain, ParameterInput, ParameterKind, ParameterSchema,
    ParameterSet, ParameterSpec, TableOptions,
};
use crate::error::{CalculatorError, ExecutionError};

pub const EXECUTABLE: &str = "fast2xy";
pub const DECK: &str = "fast2xy.inp";
pub const STAGED_INPUT: &str = "FAST2XY.DAT";

const FIELD_UNIT: &str = "sqrt(W/mm^2)";

pub static PARAMETERS: ParameterSchema = ParameterSchema::new(
    "source",
    &[
        ParameterSpec::with_default(
            "photon_energy",
            ParameterKind::Float(FloatDomain::Positive),
            DefaultValue::Float(8000.0),
        ),
        ParameterSpec::with_default("nx", ParameterKind::PositiveInt, DefaultValue::Int(64)),
        ParameterSpec::with_default("ny", ParameterKind::PositiveInt, DefaultValue::Int(64)),
        ParameterSpec::with_default("number_of_slices", ParameterKind::PositiveInt, DefaultValue::Int(1)),
        ParameterSpec::with_default(
            "float_type",
            ParameterKind::Choice(&["float", "double"]),
            DefaultValue::Text("float"),
        ),
    ],
);

pub static SCHEMA: Lazy<DataSchema> = Lazy::new(|| {
    DataSchema::closed(&[
        "/data/arrEhor",
        "/data/arrEver",
        "/params/Mesh/nSlices",
        "/params/Mesh/nx",
        "/params/Mesh/ny",
        "/params/Mesh/sliceMax",
        "/params/Mesh/sliceMin",
        "/params/Mesh/xMax",
        "/params/Mesh/xMin",
        "/params/Mesh/yMax",
        "/params/Mesh/yMin",
        "/params/Mesh/zCoord",
        "/params/Rx",
        "/params/Ry",
        "/params/dRx",
        "/params/dRy",
        "/params/nval",
        "/params/photonEnergy",
        "/params/wDomain",
        "/params/wEFieldUnit",
        "/params/wFloatType",
        "/params/wSpace",
        "/params/xCentre",
        "/params/yCentre",
        "/history/parent/info/data_description",
        "/history/parent/info/package_version",
        "/history/parent/misc/FAST2XY.DAT",
        "/history/parent/misc/angular_distribution",
        "/history/parent/misc/spot_size",
        "/history/parent/misc/gain_curve",
        "/history/parent/misc/nzc",
        "/history/parent/misc/temporal_struct",
        "/version",
    ])
});

static LAYOUT: OutputLayout = OutputLayout {
    tables: &[
        RawTable {
            file: "field.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Column(0), "/data/arrEhor", FIELD_UNIT),
                Binding::new(Field::Column(1), "/data/arrEver", FIELD_UNIT),
            ],
        },
        RawTable {
            file: "mesh.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Count(0), "/params/Mesh/nSlices", "1"),
                Binding::new(Field::Count(1), "/params/Mesh/nx", "1"),
                Binding::new(Field::Count(2), "/params/Mesh/ny", "1"),
                Binding::new(Field::Scalar(3), "/params/Mesh/sliceMax", "s"),
                Binding::new(Field::Scalar(4), "/params/Mesh/sliceMin", "s"),
                Binding::new(Field::Scalar(5), "/params/Mesh/xMax", "m"),
                Binding::new(Field::Scalar(6), "/params/Mesh/xMin", "m"),
                Binding::new(Field::Scalar(7), "/params/Mesh/yMax", "m"),
                Binding::new(Field::Scalar(8), "/params/Mesh/yMin", "m"),
                Binding::new(Field::Scalar(9), "/params/Mesh/zCoord", "m"),
            ],
        },
        RawTable {
            file: "beam.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Scalar(0), "/params/Rx", "m"),
                Binding::new(Field::Scalar(1), "/params/Ry", "m"),
                Binding::new(Field::Scalar(2), "/params/dRx", "m^-2"),
                Binding::new(Field::Scalar(3), "/params/dRy", "m^-2"),
                Binding::new(Field::Scalar(4), "/params/xCentre", "m"),
                Binding::new(Field::Scalar(5), "/params/yCentre", "m"),
            ],
        },
        RawTable {
            file: "FAST2XY.DAT",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/FAST2XY.DAT")],
        },
        RawTable {
            file: "angular_distribution.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/angular_distribution")],
        },
        RawTable {
            file: "spot_size.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/spot_size")],
        },
        RawTable {
            file: "gain_curve.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/gain_curve")],
        },
        RawTable {
            file: "nzc.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/nzc")],
        },
        RawTable {
            file: "temporal_struct.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[Binding::unitless(Field::Whole, "/history/parent/misc/temporal_struct")],
        },
    ],
    texts: &[],
};

/// Calculator for the photon source.
#[derive(Debug, Clone)]
pub struct SourceCalculator {
    base: CalculatorBase,
}

impl SourceCalculator {
    /// Build from parameters and paths relative to the current directory.
    ///
    /// `input` is an optional FAST field history; without it the program
    /// generates the pulse from the parameters alone.
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
        let base = CalculatorBase::build(StageKind::Source, base_dir, parameters, input, output, EXECUTABLE)?;
        Ok(Self { base })
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.base.executable = program.into();
        self
    }
}

impl Calculator for SourceCalculator {
    fn kind(&self) -> StageKind {
        StageKind::Source
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
        self.base.parameters.write_key_value(out, " ", false)
    }

    fn staged_input_name(&self) -> &'static str {
        STAGED_INPUT
    }

    fn collect_output(&self, workdir: &Path) -> Result<Dataset, ExecutionError> {
        let params = &self.base.parameters;
        let mut data = Dataset::new();
        LAYOUT.collect(workdir, &mut data)?;

        data.insert("/params/nval", 2_i64, Some("1"))?;
        data.insert("/params/photonEnergy", params.get_float("photon_energy").unwrap_or(8000.0), Some("eV"))?;
        data.insert("/params/wDomain", "time", None)?;
        data.insert("/params/wEFieldUnit", FIELD_UNIT, None)?;
        data.insert("/params/wFloatType", params.get_text("float_type").unwrap_or("float"), None)?;
        data.insert("/params/wSpace", "real-space", None)?;
        data.insert(
            "/history/parent/info/data_description",
            "Time-dependent electric field history from the FAST code.",
            None,
        )?;
        data.insert("/history/parent/info/package_version", "FAST2XY", None)?;
        data.insert("/version", 0.1, None)?;
        Ok(data)
    }
}
