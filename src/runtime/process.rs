//! Process launching abstraction for testability.
//!
//! Production code uses [`SystemLauncher`], which resolves the program on the
//! executable search path and runs it directly. Tests use
//! [`mock::ScriptedLauncher`], which plays the external programs in-process.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ExecutionError;

pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

/// Runs one external program inside a prepared working directory.
pub trait ProcessLauncher: Send + Sync {
    /// Run `program` with `workdir` as current directory and wait for it.
    ///
    /// Returns the exit code; a process killed by a signal reports -1.
    fn launch(&self, program: &str, workdir: &Path) -> Result<i32, ExecutionError>;
}

/// Launches real processes without a shell.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    search_path: Option<OsString>,
}

impl SystemLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `path` (in `PATH` syntax) instead of the `PATH` variable.
    pub fn with_search_path(path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(path.into()),
        }
    }

    /// Locate `program`. Names containing a path separator are used as given.
    pub fn resolve(&self, program: &str) -> Option<PathBuf> {
        let direct = Path::new(program);
        if direct.components().count() > 1 {
            return is_executable(direct).then(|| direct.to_path_buf());
        }
        let search = self.search_path.clone().or_else(|| std::env::var_os("PATH"))?;
        std::env::split_paths(&search)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, program: &str, workdir: &Path) -> Result<i32, ExecutionError> {
        let executable = self
            .resolve(program)
            .ok_or_else(|| ExecutionError::ExecutableNotFound(program.to_string()))?;

        let log = |name: &str| {
            let path = workdir.join(name);
            File::create(&path).map_err(|source| ExecutionError::Workspace { path, source })
        };
        let stdout = log(STDOUT_LOG)?;
        let stderr = log(STDERR_LOG)?;

        tracing::debug!(program = %executable.display(), workdir = %workdir.display(), "launching");
        let status = Command::new(&executable)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|source| ExecutionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub mod mock {
    //! Scripted launcher for testing without the simulation codes.
    //!
    //! Available for integration tests and external test crates.

    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};

    use crate::stage::{analyzer, diffractor, interactor, propagator, source, StageKind};

    /// Behaviour of one scripted program: inspects or writes the working directory, returns an exit code.
    pub type Script = Arc<dyn Fn(&Path) -> io::Result<i32> + Send + Sync>;

    /// One recorded launch.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Invocation {
        pub program: String,
        pub workdir: PathBuf,
    }

    /// Launcher that runs closures instead of processes.
    ///
    /// Unknown programs behave as if absent from the search path.
    #[derive(Default)]
    pub struct ScriptedLauncher {
        scripts: Mutex<HashMap<String, Script>>,
        invocations: Mutex<Vec<Invocation>>,
    }

    impl ScriptedLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every default program succeeds and leaves a minimal valid raw output.
        pub fn succeeding() -> Self {
            let launcher = Self::new();
            for kind in StageKind::ALL {
                launcher.on(default_executable(kind), move |workdir| {
                    write_raw_outputs(kind, workdir)?;
                    Ok(0)
                });
            }
            launcher
        }

        pub fn with_script(self, program: &str, script: impl Fn(&Path) -> io::Result<i32> + Send + Sync + 'static) -> Self {
            self.on(program, script);
            self
        }

        /// Set or replace the behaviour of `program`.
        pub fn on(&self, program: &str, script: impl Fn(&Path) -> io::Result<i32> + Send + Sync + 'static) {
            self.scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(program.to_string(), Arc::new(script));
        }

        /// Launches seen so far, in call order.
        pub fn invocations(&self) -> Vec<Invocation> {
            self.invocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(&self, program: &str, workdir: &Path) -> Result<i32, ExecutionError> {
            let script = self
                .scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(program)
                .cloned()
                .ok_or_else(|| ExecutionError::ExecutableNotFound(program.to_string()))?;

            self.invocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Invocation {
                    program: program.to_string(),
                    workdir: workdir.to_path_buf(),
                });

            script(workdir).map_err(|source| ExecutionError::Spawn {
                program: program.to_string(),
                source,
            })
        }
    }

    pub fn default_executable(kind: StageKind) -> &'static str {
        match kind {
            StageKind::Source => source::EXECUTABLE,
            StageKind::Propagator => propagator::EXECUTABLE,
            StageKind::Interactor => interactor::EXECUTABLE,
            StageKind::Diffractor => diffractor::EXECUTABLE,
            StageKind::Analyzer => analyzer::EXECUTABLE,
        }
    }

    /// Write the smallest raw output set each program is expected to leave behind.
    pub fn write_raw_outputs(kind: StageKind, workdir: &Path) -> io::Result<()> {
        let files: &[(&str, &str)] = match kind {
            StageKind::Source => &[
                ("field.dat", "# Ehor Ever\n1.0 0.5\n2.0 0.25\n3.0 0.125\n4.0 0.0625\n"),
                ("mesh.dat", "2 2 1 1.0e-15 -1.0e-15 1.0e-4 -1.0e-4 1.0e-4 -1.0e-4 0.0\n"),
                ("beam.dat", "1.0 1.0 0.0 0.0 0.0 0.0\n"),
                ("angular_distribution.dat", "0.0 1.0\n1.0 0.5\n"),
                ("spot_size.dat", "0.0 3.0D-05\n"),
                ("gain_curve.dat", "0.0 1.0e+06\n10.0 1.0e+09\n"),
                ("nzc.dat", "1.0\n"),
                ("temporal_struct.dat", "0.0 0.0\n1.0e-15 1.0\n"),
            ],
            StageKind::Propagator => &[
                ("field.dat", "1.0 0.5\n2.0 0.25\n3.0 0.125\n4.0 0.0625\n"),
                (
                    "mesh.dat",
                    "2 2 1 1.0e5 -1.0e5 1.0e5 -1.0e5 1.0e-15 -1.0e-15 1.0e-4 -1.0e-4 1.0e-4 -1.0e-4 200.0\n",
                ),
                ("fwhm.dat", "1.2e-6 1.3e-6\n"),
                ("beamline.txt", "Drift L = 200 m\nAperture 1 mm\n"),
            ],
            StageKind::Interactor => &[
                ("atoms.dat", "feff8.5L atoms\n    x    y    z   ipot\n0.0 0.0 0.0 0\n1.8 1.8 0.0 1\n"),
                (
                    "xmu.dat",
                    "# xmu.dat\n#  omega  e  k  mu  mu0  chi\n8979.0 -10.0 0.0 0.10 0.11 0.00\n8989.0 0.0 1.2 0.95 0.90 0.05\n",
                ),
                ("chi.dat", "#  k  chi  mag  phase\n0.0 0.0 0.01 1.57\n0.5 0.02 0.02 1.20\n"),
            ],
            StageKind::Diffractor => &[
                ("diffr.dat", "0 1 2\n3 4 5\n6 7 8\n"),
                ("angle.dat", "1.0 0.0 0.0 0.0\n"),
                ("geom.dat", "0.13 2.2e-4 2.2e-4\n"),
            ],
            StageKind::Analyzer => &[
                ("electron_density.dat", "0.0 0.1\n0.1 0.0\n"),
                ("orientations.dat", "1.0 0.0 0.0 0.0\n"),
                ("error.dat", "0.5\n0.25\n0.125\n"),
            ],
        };
        for (name, content) in files {
            fs::write(workdir.join(name), content)?;
        }
        // The source leaves its field history next to the other tables; a staged
        // input already sits under that name.
        if kind == StageKind::Source && !workdir.join(source::STAGED_INPUT).exists() {
            fs::write(workdir.join(source::STAGED_INPUT), "0.0 1.0\n1.0 2.0\n")?;
        }
        Ok(())
    }
}
