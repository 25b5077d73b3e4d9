//! Photon-matter interaction with FEFF 8.5L.
//!
//! The deck is FEFF's card format; the structure file supplies the ATOMS and
//! POTENTIALS cards verbatim. FEFF leaves `atoms.dat`, `xmu.dat` and `chi.dat`
//! behind, which become the `/data/snp_0000001` group.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde_json::json;

use super::base::CalculatorBase;
use super::io::StageIo;
use super::layout::{Binding, Field, OutputLayout, RawTable};
use super::propagator;
use super::traits::{Calculator, StageKind};
use crate::data::{
    DataSchema, Dataset, DefaultValue, FloatDomain, ParameterInput, ParameterKind, ParameterSchema, ParameterSet,
    ParameterSpec, TableOptions,
};
use crate::error::{CalculatorError, ExecutionError};

pub const EXECUTABLE: &str = "feff85L";
pub const DECK: &str = "feff.inp";
pub const STAGED_INPUT: &str = "pmi_in.json";

pub const EDGES: &[&str] = &["K", "L1", "L2", "L3", "M1", "M2", "M3", "M4", "M5"];

pub static PARAMETERS: ParameterSchema = ParameterSchema::new(
    "interactor",
    &[
        ParameterSpec::with_default("edge", ParameterKind::Choice(EDGES), DefaultValue::Text("K")),
        ParameterSpec::with_default(
            "amplitude_reduction_factor",
            ParameterKind::Float(FloatDomain::UnitInterval),
            DefaultValue::Float(1.0),
        ),
        ParameterSpec::with_default(
            "effective_path_distance",
            ParameterKind::Float(FloatDomain::Positive),
            DefaultValue::Float(5.0),
        ),
        ParameterSpec::required("structure_file", ParameterKind::ExistingFile),
    ],
);

pub static SCHEMA: Lazy<DataSchema> = Lazy::new(|| {
    let expected: Vec<&str> = propagator::SCHEMA.provided().iter().map(String::as_str).collect();
    DataSchema::extending(
        &expected,
        &[
            "/data/snp_0000001/r",
            "/data/snp_0000001/E",
            "/data/snp_0000001/DeltaE",
            "/data/snp_0000001/k",
            "/data/snp_0000001/mu",
            "/data/snp_0000001/mu0",
            "/data/snp_0000001/chi",
            "/data/snp_0000001/ampl",
            "/data/snp_0000001/phase",
            "/data/snp_0000001/potential_index",
            "/info/contact",
            "/info/data_description",
            "/info/interface_version",
            "/info/credits",
            "/info/package_version",
            "/params/edge",
            "/params/amplitude_reduction_factor",
            "/params/effective_path_distance",
        ],
    )
});

static LAYOUT: OutputLayout = OutputLayout {
    tables: &[
        RawTable {
            file: "atoms.dat",
            options: TableOptions::new().skip_rows(2),
            bindings: &[
                Binding::new(Field::Columns(0, 3), "/data/snp_0000001/r", "Angstrom"),
                Binding::new(Field::Column(3), "/data/snp_0000001/potential_index", "1"),
            ],
        },
        RawTable {
            file: "xmu.dat",
            options: TableOptions::new().comment('#'),
            bindings: &[
                Binding::new(Field::Column(0), "/data/snp_0000001/E", "eV"),
                Binding::new(Field::Column(1), "/data/snp_0000001/DeltaE", "eV"),
                Binding::new(Field::Column(2), "/data/snp_0000001/k", "1"),
                Binding::new(Field::Column(3), "/data/snp_0000001/mu", "1/Angstrom"),
                Binding::new(Field::Column(4), "/data/snp_0000001/mu0", "1/Angstrom"),
                Binding::new(Field::Column(5), "/data/snp_0000001/chi", "1"),
            ],
        },
        RawTable {
            file: "chi.dat",
            options: TableOptions::new().comment('#').columns(&[2, 3]),
            bindings: &[
                Binding::new(Field::Column(0), "/data/snp_0000001/ampl", "1"),
                Binding::new(Field::Column(1), "/data/snp_0000001/phase", "rad"),
            ],
        },
    ],
    texts: &[],
};

/// Typed form of the FEFF parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeffParameters {
    pub edge: String,
    pub amplitude_reduction_factor: f64,
    pub effective_path_distance: f64,
    pub structure_file: PathBuf,
}

impl FeffParameters {
    pub fn new(structure_file: impl Into<PathBuf>) -> Self {
        Self {
            edge: "K".to_string(),
            amplitude_reduction_factor: 1.0,
            effective_path_distance: 5.0,
            structure_file: structure_file.into(),
        }
    }
}

impl From<FeffParameters> for ParameterInput {
    fn from(p: FeffParameters) -> Self {
        ParameterInput::Raw(json!({
            "edge": p.edge,
            "amplitude_reduction_factor": p.amplitude_reduction_factor,
            "effective_path_distance": p.effective_path_distance,
            "structure_file": p.structure_file.display().to_string(),
        }))
    }
}

/// Calculator for FEFF absorption spectra.
#[derive(Debug, Clone)]
pub struct FeffCalculator {
    base: CalculatorBase,
}

impl FeffCalculator {
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
        let base = CalculatorBase::build(StageKind::Interactor, base_dir, parameters, input, output, EXECUTABLE)?;
        Ok(Self { base })
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.base.executable = program.into();
        self
    }

    fn edge(&self) -> &str {
        self.base.parameters.get_text("edge").unwrap_or("K")
    }

    fn amplitude_reduction_factor(&self) -> f64 {
        self.base.parameters.get_float("amplitude_reduction_factor").unwrap_or(1.0)
    }

    fn effective_path_distance(&self) -> f64 {
        self.base.parameters.get_float("effective_path_distance").unwrap_or(5.0)
    }
}

impl Calculator for FeffCalculator {
    fn kind(&self) -> StageKind {
        StageKind::Interactor
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
        writeln!(out, "TITLE simexrs photon-matter interaction")?;
        writeln!(out, "EDGE {}", self.edge())?;
        writeln!(out, "S02 {}", self.amplitude_reduction_factor())?;
        writeln!(out, "RPATH {}", self.effective_path_distance())?;
        writeln!(out, "CONTROL 1 1 1 1 1 1")?;
        writeln!(out, "PRINT 1 0 0 0 0 3")?;
        writeln!(out, "EXAFS 20")?;
        writeln!(out)?;
        if let Some(structure) = self.base.parameters.get_path("structure_file") {
            let cards = fs::read_to_string(structure)?;
            out.write_all(cards.as_bytes())?;
            if !cards.ends_with('\n') {
                writeln!(out)?;
            }
        }
        writeln!(out, "END")
    }

    fn staged_input_name(&self) -> &'static str {
        STAGED_INPUT
    }

    fn collect_output(&self, workdir: &Path) -> Result<Dataset, ExecutionError> {
        let mut data = Dataset::new();
        LAYOUT.collect(workdir, &mut data)?;

        data.insert("/info/contact", "simexrs maintainers", None)?;
        data.insert("/info/data_description", "Absorption spectrum and associated data.", None)?;
        data.insert("/info/interface_version", "1.0", None)?;
        data.insert(
            "/info/credits",
            "J. J. Rehr et al, \"Ab initio theory and calculations of X-ray spectra\", \
             Comptes Rendus Physique 10, 548 (2009). DOI: 10.1016/j.crhy.2008.08.004",
            None,
        )?;
        data.insert("/info/package_version", "FEFF8.5L", None)?;

        data.insert("/params/edge", self.edge(), None)?;
        data.insert("/params/amplitude_reduction_factor", self.amplitude_reduction_factor(), Some("1"))?;
        data.insert("/params/effective_path_distance", self.effective_path_distance(), Some("Angstrom"))?;
        Ok(data)
    }
}
