//! Declarative mapping from raw program output files to dataset paths.

use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{Dataset, NumericTable, TableError, TableOptions};
use crate::error::ExecutionError;

/// Which part of a table a binding extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// One column as a 1-D array.
    Column(usize),
    /// Columns `start..end` as a 2-D array.
    Columns(usize, usize),
    /// First-row value as a float.
    Scalar(usize),
    /// First-row value as an integer.
    Count(usize),
    /// The whole table as a 2-D array.
    Whole,
}

/// One extracted field and where it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub field: Field,
    pub path: &'static str,
    pub unit: Option<&'static str>,
}

impl Binding {
    pub const fn new(field: Field, path: &'static str, unit: &'static str) -> Self {
        Self {
            field,
            path,
            unit: Some(unit),
        }
    }

    pub const fn unitless(field: Field, path: &'static str) -> Self {
        Self { field, path, unit: None }
    }
}

/// A numeric table file and its bindings.
#[derive(Debug, Clone, Copy)]
pub struct RawTable {
    pub file: &'static str,
    pub options: TableOptions,
    pub bindings: &'static [Binding],
}

/// A text file stored verbatim at `path`.
#[derive(Debug, Clone, Copy)]
pub struct RawText {
    pub file: &'static str,
    pub path: &'static str,
}

/// Everything one program leaves behind that ends up in the artifact.
#[derive(Debug, Clone, Copy)]
pub struct OutputLayout {
    pub tables: &'static [RawTable],
    pub texts: &'static [RawText],
}

impl OutputLayout {
    /// Read every listed file in `workdir` into `into`.
    pub fn collect(&self, workdir: &Path, into: &mut Dataset) -> Result<(), ExecutionError> {
        for table in self.tables {
            let file = raw_file(workdir, table.file)?;
            let data = NumericTable::load(&file, &table.options)?;
            for binding in table.bindings {
                bind(&data, binding, into).map_err(|err| match err {
                    ExecutionError::Table(t) => ExecutionError::Table(t.at(&file)),
                    other => other,
                })?;
            }
        }
        for text in self.texts {
            let file = raw_file(workdir, text.file)?;
            let content = fs::read_to_string(&file).map_err(|source| {
                ExecutionError::Table(TableError::Io {
                    path: file.clone(),
                    source,
                })
            })?;
            into.insert(text.path, content, None)?;
        }
        Ok(())
    }
}

fn raw_file(workdir: &Path, name: &str) -> Result<PathBuf, ExecutionError> {
    let path = workdir.join(name);
    if !path.is_file() {
        return Err(ExecutionError::MissingOutput { path });
    }
    Ok(path)
}

fn bind(table: &NumericTable, binding: &Binding, into: &mut Dataset) -> Result<(), ExecutionError> {
    match binding.field {
        Field::Column(i) => into.insert(binding.path, table.column(i)?, binding.unit)?,
        Field::Columns(start, end) => into.insert(binding.path, table.column_range(start, end)?, binding.unit)?,
        Field::Scalar(i) => into.insert(binding.path, table.scalar(i)?, binding.unit)?,
        Field::Count(i) => into.insert(binding.path, count(table, i)?, binding.unit)?,
        Field::Whole => into.insert(binding.path, table.data().clone(), binding.unit)?,
    }
    Ok(())
}

/// Integer count stored as a float cell; must be finite and fit an i64.
fn count(table: &NumericTable, index: usize) -> Result<i64, TableError> {
    let x = table.scalar(index)?.round();
    if !x.is_finite() || x.abs() >= i64::MAX as f64 {
        return Err(TableError::Row {
            path: PathBuf::new(),
            line: 1,
            message: format!("column {} is not a count: {}", index, x),
        });
    }
    Ok(x as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetValue;

    const LAYOUT: OutputLayout = OutputLayout {
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
                file: "geom.dat",
                options: TableOptions::new(),
                bindings: &[
                    Binding::new(Field::Scalar(0), "/params/geom/detectorDist", "m"),
                    Binding::unitless(Field::Count(1), "/params/geom/pixels"),
                ],
            },
        ],
        texts: &[RawText {
            file: "beamline.txt",
            path: "/params/beamline/printout",
        }],
    };

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_collect_all_bindings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "atoms.dat", "atoms\nx y z ipot\n0 0 0 0\n1.8 0 0 1\n");
        write(dir.path(), "geom.dat", "0.13 64\n");
        write(dir.path(), "beamline.txt", "Drift 10 m\n");

        let mut ds = Dataset::new();
        LAYOUT.collect(dir.path(), &mut ds).unwrap();

        assert_eq!(ds.len(), 5);
        assert_eq!(ds.unit("/data/snp_0000001/r"), Some("Angstrom"));
        match ds.value("/data/snp_0000001/r") {
            Some(DatasetValue::Array(a)) => assert_eq!(a.shape(), &[2, 3]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ds.value("/params/geom/detectorDist"), Some(&DatasetValue::Float(0.13)));
        assert_eq!(ds.value("/params/geom/pixels"), Some(&DatasetValue::Int(64)));
        assert_eq!(
            ds.value("/params/beamline/printout"),
            Some(&DatasetValue::Text("Drift 10 m\n".to_string()))
        );
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "atoms.dat", "atoms\nx y z ipot\n0 0 0 0\n");

        let err = LAYOUT.collect(dir.path(), &mut Dataset::new()).unwrap_err();
        match err {
            ExecutionError::MissingOutput { path } => assert_eq!(path, dir.path().join("geom.dat")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_short_table_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "atoms.dat", "atoms\nx y z\n0 0 0\n");

        match LAYOUT.collect(dir.path(), &mut Dataset::new()) {
            Err(ExecutionError::Table(TableError::ColumnOutOfRange { path, index: 3, .. })) => {
                assert_eq!(path, dir.path().join("atoms.dat"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_count_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "atoms.dat", "atoms\nx y z ipot\n0 0 0 0\n");
        write(dir.path(), "geom.dat", "0.13 NaN\n");
        write(dir.path(), "beamline.txt", "Drift 10 m\n");

        match LAYOUT.collect(dir.path(), &mut Dataset::new()) {
            Err(ExecutionError::Table(TableError::Row { path, .. })) => assert_eq!(path, dir.path().join("geom.dat")),
            other => panic!("unexpected {other:?}"),
        }

        write(dir.path(), "geom.dat", "0.13 1e300\n");
        assert!(matches!(
            LAYOUT.collect(dir.path(), &mut Dataset::new()),
            Err(ExecutionError::Table(TableError::Row { .. }))
        ));
    }
}
