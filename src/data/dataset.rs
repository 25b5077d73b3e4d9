//! Path-keyed dataset artifacts exchanged between stages.
//!
//! An artifact is a tree of groups addressed by slash-separated paths such as
//! `/data/arrEhor` or `/history/parent/misc/nzc`. Leaves hold scalars, text or
//! f64 arrays and may carry a `unit` attribute. Artifacts are written as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Leaf payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DatasetValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    Array(ArrayD<f64>),
}

impl DatasetValue {
    /// NaN and infinities have no JSON form.
    pub fn is_finite(&self) -> bool {
        match self {
            DatasetValue::Float(x) => x.is_finite(),
            DatasetValue::Array(a) => a.iter().all(|x| x.is_finite()),
            _ => true,
        }
    }
}

impl From<f64> for DatasetValue {
    fn from(x: f64) -> Self {
        DatasetValue::Float(x)
    }
}

impl From<i64> for DatasetValue {
    fn from(i: i64) -> Self {
        DatasetValue::Int(i)
    }
}

impl From<bool> for DatasetValue {
    fn from(b: bool) -> Self {
        DatasetValue::Bool(b)
    }
}

impl From<&str> for DatasetValue {
    fn from(s: &str) -> Self {
        DatasetValue::Text(s.to_string())
    }
}

impl From<String> for DatasetValue {
    fn from(s: String) -> Self {
        DatasetValue::Text(s)
    }
}

impl From<Array1<f64>> for DatasetValue {
    fn from(a: Array1<f64>) -> Self {
        DatasetValue::Array(a.into_dyn())
    }
}

impl From<Array2<f64>> for DatasetValue {
    fn from(a: Array2<f64>) -> Self {
        DatasetValue::Array(a.into_dyn())
    }
}

/// A leaf with its optional unit attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub value: DatasetValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid dataset path '{0}'")]
    InvalidPath(String),

    #[error("dataset path '{path}' conflicts with existing '{existing}'")]
    GroupConflict { path: String, existing: String },

    #[error("dataset '{0}' not found")]
    NotFound(String),

    #[error("dataset '{0}' holds a non-finite value")]
    NonFinite(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Normalize a dataset path to `/a/b/c` form.
pub fn normalize_path(path: &str) -> Result<String, DatasetError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() || trimmed.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(DatasetError::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", trimmed))
}

/// In-memory form of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    entries: BTreeMap<String, DatasetEntry>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a leaf.
    ///
    /// Fails if the path would turn an existing leaf into a group or the other
    /// way round.
    pub fn insert(
        &mut self,
        path: &str,
        value: impl Into<DatasetValue>,
        unit: Option<&str>,
    ) -> Result<(), DatasetError> {
        let path = normalize_path(path)?;
        let value = value.into();
        if !value.is_finite() {
            return Err(DatasetError::NonFinite(path));
        }
        if let Some(existing) = self.conflicting(&path) {
            return Err(DatasetError::GroupConflict { path, existing });
        }
        self.entries.insert(
            path,
            DatasetEntry {
                value,
                unit: unit.map(str::to_string),
            },
        );
        Ok(())
    }

    fn conflicting(&self, path: &str) -> Option<String> {
        let as_group = format!("{}/", path);
        if let Some((key, _)) = self.entries.range(as_group.clone()..).next() {
            if key.starts_with(&as_group) {
                return Some(key.clone());
            }
        }
        // Every proper ancestor must not be a leaf.
        let mut end = 0;
        while let Some(pos) = path[end + 1..].find('/') {
            end += pos + 1;
            let ancestor = &path[..end];
            if self.entries.contains_key(ancestor) {
                return Some(ancestor.to_string());
            }
        }
        None
    }

    pub fn get(&self, path: &str) -> Option<&DatasetEntry> {
        let path = normalize_path(path).ok()?;
        self.entries.get(&path)
    }

    pub fn value(&self, path: &str) -> Option<&DatasetValue> {
        self.get(path).map(|e| &e.value)
    }

    pub fn unit(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|e| e.unit.as_deref())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Leaf paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths from `required` that are not present.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|p| !self.contains(p))
            .map(String::as_str)
            .collect()
    }

    /// Copy the listed leaves from `other`; returns the paths `other` lacked.
    pub fn copy_from(&mut self, other: &Dataset, paths: &[String]) -> Result<Vec<String>, DatasetError> {
        let mut absent = Vec::new();
        for path in paths {
            match other.get(path) {
                Some(entry) => {
                    self.insert(path, entry.value.clone(), entry.unit.as_deref())?;
                }
                None => absent.push(path.clone()),
            }
        }
        Ok(absent)
    }

    /// Write every leaf of `other` into this dataset, replacing existing ones.
    pub fn merge(&mut self, other: Dataset) -> Result<(), DatasetError> {
        for (path, entry) in other.entries {
            if let Some(existing) = self.conflicting(&path) {
                return Err(DatasetError::GroupConflict { path, existing });
            }
            self.entries.insert(path, entry);
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, DatasetError> {
        let file = fs::File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| DatasetError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the artifact, replacing `path` only once the content is complete.
    ///
    /// The `.partial` sibling is removed again if anything fails.
    pub fn write(&self, path: &Path) -> Result<(), DatasetError> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let result = self.write_partial(&partial, path).and_then(|()| {
            fs::rename(&partial, path).map_err(|source| DatasetError::Io {
                path: path.to_path_buf(),
                source,
            })
        });
        if result.is_err() {
            if let Err(err) = fs::remove_file(&partial) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(partial = %partial.display(), error = %err, "cannot remove partial artifact");
                }
            }
        }
        result
    }

    fn write_partial(&self, partial: &Path, path: &Path) -> Result<(), DatasetError> {
        let io_err = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = fs::File::create(partial).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| DatasetError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)
    }
}
