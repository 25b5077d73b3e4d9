//! Whitespace-separated numeric tables written by the external programs.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2, Axis};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read table {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} line {line}: {message}", .path.display())]
    Row {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("table {} has no data rows", .path.display())]
    Empty { path: PathBuf },

    #[error("table {} has {columns} columns, column {index} requested", .path.display())]
    ColumnOutOfRange {
        path: PathBuf,
        index: usize,
        columns: usize,
    },

    #[error("table {}: empty or reversed column range {start}..{end}", .path.display())]
    InvalidRange { path: PathBuf, start: usize, end: usize },
}

/// How to read a table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableOptions {
    /// Leading lines to skip before looking for data.
    pub skip_rows: usize,
    /// Lines starting with this character (after whitespace) are ignored.
    pub comment: Option<char>,
    /// Keep only these columns, in this order.
    pub columns: Option<&'static [usize]>,
}

impl TableOptions {
    pub const fn new() -> Self {
        Self {
            skip_rows: 0,
            comment: None,
            columns: None,
        }
    }

    pub const fn skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    pub const fn comment(mut self, marker: char) -> Self {
        self.comment = Some(marker);
        self
    }

    pub const fn columns(mut self, columns: &'static [usize]) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// A rectangular table of f64 values.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTable {
    data: Array2<f64>,
}

impl NumericTable {
    pub fn load(path: &Path, options: &TableOptions) -> Result<Self, TableError> {
        let content = fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, options).map_err(|err| err.at(path))
    }

    /// Parse table text. Errors carry an empty path until attached by `load`.
    pub fn parse(content: &str, options: &TableOptions) -> Result<Self, TableError> {
        let mut values = Vec::new();
        let mut width: Option<usize> = None;
        let mut rows = 0;

        for (line_index, line) in content.lines().enumerate().skip(options.skip_rows) {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(marker) = options.comment {
                if trimmed.starts_with(marker) {
                    continue;
                }
            }

            let row: Vec<f64> = trimmed
                .split_whitespace()
                .map(|token| match parse_number(token) {
                    Some(x) if x.is_finite() => Ok(x),
                    Some(_) => Err(row_error(line_index, format!("non-finite value '{}'", token))),
                    None => Err(row_error(line_index, format!("non-numeric field in '{}'", trimmed))),
                })
                .collect::<Result<_, _>>()?;

            let row = match options.columns {
                Some(columns) => columns
                    .iter()
                    .map(|&c| {
                        row.get(c).copied().ok_or_else(|| {
                            row_error(line_index, format!("has {} columns, column {} requested", row.len(), c))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => row,
            };

            match width {
                None => width = Some(row.len()),
                Some(w) if w != row.len() => {
                    return Err(row_error(line_index, format!("expected {} columns, found {}", w, row.len())));
                }
                Some(_) => {}
            }
            values.extend(row);
            rows += 1;
        }

        let width = match width {
            Some(w) if rows > 0 => w,
            _ => return Err(TableError::Empty { path: PathBuf::new() }),
        };
        let data = Array2::from_shape_vec((rows, width), values).map_err(|e| row_error(0, e.to_string()))?;
        Ok(Self { data })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn columns(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    /// One column as a 1-D array.
    pub fn column(&self, index: usize) -> Result<Array1<f64>, TableError> {
        self.check_column(index)?;
        Ok(self.data.index_axis(Axis(1), index).to_owned())
    }

    /// Columns `start..end` as a 2-D array.
    pub fn column_range(&self, start: usize, end: usize) -> Result<Array2<f64>, TableError> {
        if start >= end {
            return Err(TableError::InvalidRange {
                path: PathBuf::new(),
                start,
                end,
            });
        }
        self.check_column(end - 1)?;
        Ok(self.data.slice(s![.., start..end]).to_owned())
    }

    /// Value in the first row, for single-row parameter tables.
    pub fn scalar(&self, index: usize) -> Result<f64, TableError> {
        self.check_column(index)?;
        Ok(self.data[[0, index]])
    }

    fn check_column(&self, index: usize) -> Result<(), TableError> {
        if index >= self.columns() {
            return Err(TableError::ColumnOutOfRange {
                path: PathBuf::new(),
                index,
                columns: self.columns(),
            });
        }
        Ok(())
    }
}

impl TableError {
    /// Attach the file a parse error came from.
    pub fn at(self, file: &Path) -> Self {
        match self {
            TableError::Row { line, message, .. } => TableError::Row {
                path: file.to_path_buf(),
                line,
                message,
            },
            TableError::Empty { .. } => TableError::Empty {
                path: file.to_path_buf(),
            },
            TableError::ColumnOutOfRange { index, columns, .. } => TableError::ColumnOutOfRange {
                path: file.to_path_buf(),
                index,
                columns,
            },
            TableError::InvalidRange { start, end, .. } => TableError::InvalidRange {
                path: file.to_path_buf(),
                start,
                end,
            },
            io @ TableError::Io { .. } => io,
        }
    }
}

fn row_error(line_index: usize, message: String) -> TableError {
    TableError::Row {
        path: PathBuf::new(),
        line: line_index + 1,
        message,
    }
}

/// Parse a number, accepting Fortran `D` exponents.
fn parse_number(token: &str) -> Option<f64> {
    token
        .parse::<f64>()
        .ok()
        .or_else(|| token.replace(['D', 'd'], "E").parse::<f64>().ok())
}
