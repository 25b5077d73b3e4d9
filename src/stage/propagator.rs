//! Wavefront propagation through the beamline with `wpg_propagate`.

use std::io::{self, Write};
use std::path::Path;

use once_cell::sync::Lazy;

use super::base::CalculatorBase;
use super::io::StageIo;
use super::layout::{Binding, Field, OutputLayout, RawTable, RawText};
use super::traits::{Calculator, StageKind};
use crate::data::{
    DataSchema, Dataset, DefaultValue, ParameterInput, ParameterKind, ParameterSchema, ParameterSet, ParameterSpec,
    TableOptions,
};
use crate::error::{CalculatorError, ExecutionError};

pub const EXECUTABLE: &str = "wpg_propagate";
pub const DECK: &str = "prop.inp";
pub const STAGED_INPUT: &str = "prop_in.json";

pub static PARAMETERS: ParameterSchema = ParameterSchema::new(
    "propagator",
    &[
        ParameterSpec::optional("beamline_file", ParameterKind::ExistingFile),
        ParameterSpec::with_default("number_of_cpus", ParameterKind::PositiveInt, DefaultValue::Int(1)),
    ],
);

/// Wavefront datasets a propagator needs from its source.
pub(crate) const WAVEFRONT: &[&str] = &[
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
    "/version",
];

pub static SCHEMA: Lazy<DataSchema> = Lazy::new(|| {
    DataSchema::extending(
        WAVEFRONT,
        &[
            "/params/Mesh/qxMax",
            "/params/Mesh/qxMin",
            "/params/Mesh/qyMax",
            "/params/Mesh/qyMin",
            "/params/beamline/printout",
            "/info/package_version",
            "/info/contact",
            "/info/data_description",
            "/info/method_description",
            "/misc/xFWHM",
            "/misc/yFWHM",
        ],
    )
});

const FIELD_UNIT: &str = "sqrt(W/mm^2)";

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
                Binding::new(Field::Scalar(3), "/params/Mesh/qxMax", "1/m"),
                Binding::new(Field::Scalar(4), "/params/Mesh/qxMin", "1/m"),
                Binding::new(Field::Scalar(5), "/params/Mesh/qyMax", "1/m"),
                Binding::new(Field::Scalar(6), "/params/Mesh/qyMin", "1/m"),
                Binding::new(Field::Scalar(7), "/params/Mesh/sliceMax", "s"),
                Binding::new(Field::Scalar(8), "/params/Mesh/sliceMin", "s"),
                Binding::new(Field::Scalar(9), "/params/Mesh/xMax", "m"),
                Binding::new(Field::Scalar(10), "/params/Mesh/xMin", "m"),
                Binding::new(Field::Scalar(11), "/params/Mesh/yMax", "m"),
                Binding::new(Field::Scalar(12), "/params/Mesh/yMin", "m"),
                Binding::new(Field::Scalar(13), "/params/Mesh/zCoord", "m"),
            ],
        },
        RawTable {
            file: "fwhm.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Scalar(0), "/misc/xFWHM", "m"),
                Binding::new(Field::Scalar(1), "/misc/yFWHM", "m"),
            ],
        },
    ],
    texts: &[RawText {
        file: "beamline.txt",
        path: "/params/beamline/printout",
    }],
};

/// Calculator for XFEL beam propagation.
#[derive(Debug, Clone)]
pub struct PropagatorCalculator {
    base: CalculatorBase,
}

impl PropagatorCalculator {
    /// Build from parameters and paths relative to the current directory.
    ///
    /// `input` is a source artifact, or a directory of them for fan-out.
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
        let base = CalculatorBase::build(StageKind::Propagator, base_dir, parameters, input, output, EXECUTABLE)?;
        Ok(Self { base })
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.base.executable = program.into();
        self
    }
}

impl Calculator for PropagatorCalculator {
    fn kind(&self) -> StageKind {
        StageKind::Propagator
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
        data.insert("/info/package_version", "WPG", None)?;
        data.insert("/info/contact", "WPG developers <wpg@xfel.eu>", None)?;
        data.insert("/info/data_description", "Electric field after propagation through the beamline.", None)?;
        data.insert(
            "/info/method_description",
            "Fourier optics wavefront propagation with SRW, driven through WPG.",
            None,
        )?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetValue;
    use crate::error::{ConfigurationError, PathError};
    use crate::runtime::process::mock::write_raw_outputs;
    use serde_json::json;

    fn upstream(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("source_out_0000001.json");
        std::fs::write(&path, "{}").unwrap();
        path
    }

    #[test]
    fn test_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap_err();
        assert!(matches!(err, CalculatorError::Path(PathError::MissingInput { .. })));
    }

    #[test]
    fn test_beamline_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let input = upstream(dir.path());
        let err = PropagatorCalculator::new_in(
            Some(dir.path()),
            json!({"beamline_file": "no_such_beamline.py"}),
            Some(&input),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CalculatorError::Configuration(ConfigurationError::MissingFile { .. })
        ));

        let beamline = dir.path().join("beamline.py");
        std::fs::write(&beamline, "drift(10)\n").unwrap();
        let calc = PropagatorCalculator::new_in(
            Some(dir.path()),
            json!({"beamline_file": beamline.display().to_string()}),
            Some(&input),
            None,
        )
        .unwrap();
        assert!(calc.parameters().get_path("beamline_file").unwrap().is_absolute());
        assert_eq!(calc.io().output(), dir.path().join("prop/prop_out_0000001.json"));
    }

    #[test]
    fn test_schema_extends_wavefront() {
        let dir = tempfile::tempdir().unwrap();
        let input = upstream(dir.path());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();
        assert_eq!(calc.expected_data().len(), WAVEFRONT.len());
        assert!(calc.provided_data().iter().any(|p| p == "/misc/xFWHM"));
        assert!(calc.schema().accepts_output_of(StageKind::Source.schema()));
    }

    #[test]
    fn test_collect_reads_mesh_and_printout() {
        let dir = tempfile::tempdir().unwrap();
        let input = upstream(dir.path());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        write_raw_outputs(StageKind::Propagator, &work).unwrap();

        let data = calc.collect_output(&work).unwrap();
        assert!(data.contains("/params/Mesh/qxMax"));
        assert!(data.contains("/misc/yFWHM"));
        assert!(matches!(data.value("/params/beamline/printout"), Some(DatasetValue::Text(_))));
        assert!(matches!(data.value("/params/Mesh/nx"), Some(DatasetValue::Int(_))));
    }
}
