//! Input/output location resolution for calculators.

use std::fs;
use std::path::{Path, PathBuf};

use super::StageKind;
use crate::error::PathError;

/// Resolved, absolute locations of one calculator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageIo {
    input: Option<PathBuf>,
    output: PathBuf,
    fan_out: bool,
}

/// One external-program run derived from a [`StageIo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Position in sorted input order; also the output number.
    pub index: usize,
    pub input: Option<PathBuf>,
    pub output: PathBuf,
}

impl StageIo {
    /// Resolve against the current directory.
    pub fn resolve(kind: StageKind, input: Option<&Path>, output: Option<&Path>) -> Result<Self, PathError> {
        let base = std::env::current_dir().map_err(PathError::CurrentDir)?;
        Self::resolve_in(&base, kind, input, output)
    }

    /// Resolve relative paths against `base`.
    ///
    /// The input must exist unless the stage is a pure source. The output
    /// location (its parent, or itself in directory mode) is created if absent;
    /// an existing entry of the wrong kind is an error and is left untouched.
    pub fn resolve_in(
        base: &Path,
        kind: StageKind,
        input: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<Self, PathError> {
        let base = if base.is_absolute() {
            base.to_path_buf()
        } else {
            std::env::current_dir().map_err(PathError::CurrentDir)?.join(base)
        };
        let input = match input {
            Some(path) => {
                let path = base.join(path);
                if !path.exists() {
                    return Err(PathError::InputNotFound {
                        stage: kind.name(),
                        path,
                    });
                }
                Some(path)
            }
            None if kind.consumes_artifact() => return Err(PathError::MissingInput { stage: kind.name() }),
            None => None,
        };
        let fan_out = input.as_deref().is_some_and(Path::is_dir);

        let output = match output {
            Some(path) => base.join(path),
            None if fan_out => base.join(kind.output_dir()),
            None => base.join(kind.output_dir()).join(kind.output_file_name(1)),
        };

        if fan_out {
            ensure_dir(&output)?;
        } else {
            if output.is_dir() {
                return Err(PathError::OutputIsDirectory { path: output });
            }
            if let Some(parent) = output.parent() {
                ensure_dir(parent)?;
            }
        }

        Ok(Self { input, output, fan_out })
    }

    pub fn input(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Whether the input is a directory processed entry by entry.
    pub fn is_fan_out(&self) -> bool {
        self.fan_out
    }

    /// Remove numbered outputs of an earlier run from the fan-out directory.
    ///
    /// Only `<stage>_out_<n>.json` files and their `.partial` siblings are
    /// touched; nothing is removed when the output directory is the input.
    pub fn clear_stale_outputs(&self, kind: StageKind) -> Result<Vec<PathBuf>, PathError> {
        if !self.fan_out || self.input.as_deref() == Some(self.output.as_path()) {
            return Ok(Vec::new());
        }
        let dir = &self.output;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PathError::io(dir, e)),
        };
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PathError::io(dir, e))?;
            let path = entry.path();
            let numbered = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| is_numbered_output(kind, n));
            if numbered && path.is_file() {
                fs::remove_file(&path).map_err(|e| PathError::io(&path, e))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// Expand into runs.
    ///
    /// In directory mode the input's files are sorted by name; the i-th file
    /// (from 0) writes `<output>/<stage>_out_<i>.json`. Hidden files and
    /// `.partial` leftovers are ignored, and stages reading an upstream
    /// artifact only take `.json` files.
    pub fn jobs(&self, kind: StageKind) -> Result<Vec<Job>, PathError> {
        if !self.fan_out {
            return Ok(vec![Job {
                index: 0,
                input: self.input.clone(),
                output: self.output.clone(),
            }]);
        }

        ensure_dir(&self.output)?;
        let dir = self.input.as_deref().unwrap_or(&self.output);
        let entries = fs::read_dir(dir).map_err(|e| PathError::io(dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PathError::io(dir, e))?;
            let path = entry.path();
            if path.is_file() && is_job_input(kind, &path) {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(index, input)| Job {
                index,
                input: Some(input),
                output: self.output.join(kind.output_file_name(index)),
            })
            .collect())
    }
}

fn is_job_input(kind: StageKind, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.ends_with(".partial") {
        return false;
    }
    !kind.consumes_artifact() || path.extension().is_some_and(|e| e == "json")
}

/// `<dir>_out_<digits>.json`, optionally with `.partial` appended.
fn is_numbered_output(kind: StageKind, name: &str) -> bool {
    let name = name.strip_suffix(".partial").unwrap_or(name);
    name.strip_prefix(kind.output_dir())
        .and_then(|rest| rest.strip_prefix("_out_"))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Create `path` as a directory, refusing if it or an ancestor is a file.
pub(crate) fn ensure_dir(path: &Path) -> Result<(), PathError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            if !ancestor.is_dir() {
                return Err(PathError::NotADirectory {
                    path: ancestor.to_path_buf(),
                });
            }
            break;
        }
    }
    fs::create_dir_all(path).map_err(|e| PathError::io(path, e))
}
