//! Blocking executor driving calculators through their run lifecycle.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::RuntimeConfig;
use super::process::{ProcessLauncher, SystemLauncher};
use super::state::{JobReport, RunReport, RunState, RunStatus, StateTracker};
use crate::data::Dataset;
use crate::error::ExecutionError;
use crate::stage::io::ensure_dir;
use crate::stage::{Calculator, Job};

/// Runs calculators: one job per input, or one per file in directory mode.
pub struct ProcessRunner {
    config: RuntimeConfig,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ProcessRunner {
    /// Runner launching real processes on the configured search path.
    pub fn new(config: RuntimeConfig) -> Self {
        let launcher = match &config.search_path {
            Some(path) => SystemLauncher::with_search_path(path),
            None => SystemLauncher::new(),
        };
        Self::with_launcher(config, Arc::new(launcher))
    }

    pub fn with_launcher(config: RuntimeConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run every job of `calc` and report per-job outcomes in input order.
    ///
    /// Never fails: execution errors become nonzero statuses in the report.
    pub fn run<C: Calculator + ?Sized>(&self, calc: &C) -> RunReport {
        let kind = calc.kind();
        let listed = calc.io().clear_stale_outputs(kind).and_then(|stale| {
            if !stale.is_empty() {
                warn!(stage = %kind, removed = stale.len(), output = %calc.io().output().display(), "removed outputs of an earlier run");
            }
            calc.io().jobs(kind)
        });
        let jobs = match listed {
            Ok(jobs) => jobs,
            Err(err) => {
                let err = ExecutionError::from(err);
                error!(stage = %kind, error = %err, "cannot list jobs");
                return RunReport {
                    stage: kind,
                    jobs: vec![failed_before_start(calc, &err)],
                };
            }
        };

        let workers = self.config.effective_workers();
        info!(stage = %kind, jobs = jobs.len(), workers, "running stage");
        if calc.io().is_fan_out() && jobs.is_empty() {
            warn!(stage = %kind, input = ?calc.io().input(), "input directory is empty");
        }

        let reports: Vec<JobReport> = if workers > 1 && jobs.len() > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| jobs.par_iter().map(|job| self.run_job(calc, job)).collect()),
                Err(err) => {
                    warn!(error = %err, "cannot build worker pool, running sequentially");
                    jobs.iter().map(|job| self.run_job(calc, job)).collect()
                }
            }
        } else {
            jobs.iter().map(|job| self.run_job(calc, job)).collect()
        };

        let report = RunReport { stage: kind, jobs: reports };
        info!(stage = %kind, code = report.code(), "stage finished");
        report
    }

    fn run_job<C: Calculator + ?Sized>(&self, calc: &C, job: &Job) -> JobReport {
        let started = Instant::now();
        let mut tracker = StateTracker::new();
        let mut workdir = None;

        let result = self.execute(calc, job, &mut tracker, &mut workdir);
        let (status, error) = match result {
            Ok(()) => (RunStatus::Ok, None),
            Err(err) => {
                if let Err(transition) = tracker.advance(RunState::Failed) {
                    warn!(stage = %calc.kind(), job = job.index, error = %transition, "cannot mark job failed");
                }
                let status = RunStatus::from(&err);
                warn!(
                    stage = %calc.kind(),
                    job = job.index,
                    code = status.code(),
                    workdir = ?workdir,
                    error = %err,
                    "job failed"
                );
                (status, Some(err.to_string()))
            }
        };

        if status.is_success() && self.config.cleanup_on_success {
            if let Some(dir) = workdir.take() {
                if let Err(err) = fs::remove_dir_all(&dir) {
                    warn!(workdir = %dir.display(), error = %err, "cannot remove working directory");
                    workdir = Some(dir);
                }
            }
        }

        JobReport {
            index: job.index,
            input: job.input.clone(),
            output: job.output.clone(),
            workdir,
            state: tracker.state(),
            status,
            error,
            elapsed: started.elapsed(),
        }
    }

    fn execute<C: Calculator + ?Sized>(
        &self,
        calc: &C,
        job: &Job,
        tracker: &mut StateTracker,
        workdir_slot: &mut Option<PathBuf>,
    ) -> Result<(), ExecutionError> {
        let kind = calc.kind();

        if let Some(parent) = job.output.parent() {
            ensure_dir(parent)?;
        }
        tracker.advance(RunState::Ready)?;

        let workdir = self.create_workdir(calc)?;
        *workdir_slot = Some(workdir.clone());
        debug!(stage = %kind, workdir = %workdir.display(), "working directory created");

        let deck = workdir.join(calc.deck_name());
        write_deck(calc, &deck)?;
        debug!(deck = %deck.display(), "input deck written");

        if let Some(input) = &job.input {
            let staged = workdir.join(calc.staged_input_name());
            fs::copy(input, &staged).map_err(|source| ExecutionError::Staging {
                path: input.clone(),
                source,
            })?;
            debug!(input = %input.display(), staged = %staged.display(), "input staged");
        }

        tracker.advance(RunState::Running)?;
        info!(stage = %kind, job = job.index, program = calc.executable(), "launching");
        let code = match self.launcher.launch(calc.executable(), &workdir) {
            Ok(code) => code,
            Err(err) => {
                error!(stage = %kind, program = calc.executable(), error = %err, "launch failed");
                return Err(err);
            }
        };
        if code != 0 {
            return Err(ExecutionError::NonZeroExit {
                program: calc.executable().to_string(),
                code,
            });
        }

        let mut artifact = Dataset::new();
        if kind.consumes_artifact() {
            if let Some(input) = &job.input {
                let upstream = Dataset::read(input).map_err(|source| ExecutionError::UpstreamArtifact {
                    path: input.clone(),
                    source,
                })?;
                let absent = artifact.copy_from(&upstream, calc.expected_data())?;
                if !absent.is_empty() {
                    warn!(stage = %kind, input = %input.display(), missing = ?absent, "upstream artifact lacks expected datasets");
                }
            }
        }
        artifact.merge(calc.collect_output(&workdir)?)?;

        if self.config.verify_outputs {
            let missing: Vec<String> = artifact
                .missing(calc.provided_data())
                .into_iter()
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(ExecutionError::UnfulfilledContract(missing));
            }
        }

        artifact.write(&job.output)?;
        tracker.advance(RunState::Succeeded)?;
        info!(stage = %kind, job = job.index, output = %job.output.display(), "job succeeded");
        Ok(())
    }

    /// Fresh `simex_<stage>_<uuid>` directory; never reuses an existing one.
    fn create_workdir<C: Calculator + ?Sized>(&self, calc: &C) -> Result<PathBuf, ExecutionError> {
        let scratch = &self.config.scratch_dir;
        fs::create_dir_all(scratch).map_err(|source| ExecutionError::Workspace {
            path: scratch.clone(),
            source,
        })?;
        let workdir = scratch.join(format!("simex_{}_{}", calc.kind().name(), Uuid::new_v4()));
        fs::create_dir(&workdir).map_err(|source| ExecutionError::Workspace {
            path: workdir.clone(),
            source,
        })?;
        Ok(workdir)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

fn write_deck<C: Calculator + ?Sized>(calc: &C, path: &Path) -> Result<(), ExecutionError> {
    let deck_err = |source| ExecutionError::Deck {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(deck_err)?;
    let mut writer = BufWriter::new(file);
    calc.write_deck(&mut writer).map_err(deck_err)?;
    writer.flush().map_err(deck_err)
}

fn failed_before_start<C: Calculator + ?Sized>(calc: &C, err: &ExecutionError) -> JobReport {
    JobReport {
        index: 0,
        input: calc.io().input().map(Path::to_path_buf),
        output: calc.io().output().to_path_buf(),
        workdir: None,
        state: RunState::Failed,
        status: RunStatus::from(err),
        error: Some(err.to_string()),
        elapsed: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetValue;
    use crate::runtime::process::mock::{write_raw_outputs, ScriptedLauncher};
    use crate::stage::{FeffCalculator, FeffParameters, PropagatorCalculator, SourceCalculator, StageKind};
    use crate::data::ParameterInput;
    use ndarray::array;

    fn runner(scratch: &Path, launcher: ScriptedLauncher) -> (ProcessRunner, Arc<ScriptedLauncher>) {
        let launcher = Arc::new(launcher);
        let config = RuntimeConfig {
            scratch_dir: scratch.to_path_buf(),
            ..RuntimeConfig::default()
        };
        (ProcessRunner::with_launcher(config, launcher.clone()), launcher)
    }

    fn source_artifact(path: &Path) {
        let mut ds = Dataset::new();
        for p in StageKind::Source.schema().provided() {
            ds.insert(p, 1.0, None).unwrap();
        }
        ds.insert("/data/arrEhor", array![9.0, 9.0], Some("sqrt(W/mm^2)")).unwrap();
        ds.write(path).unwrap();
    }

    #[test]
    fn test_source_run_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, launcher) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = SourceCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap();

        let report = runner.run(&calc);
        assert_eq!(report.code(), 0, "{report:?}");
        let job = &report.jobs[0];
        assert_eq!(job.state, RunState::Succeeded);

        let workdir = job.workdir.as_ref().unwrap();
        assert!(workdir.file_name().unwrap().to_str().unwrap().starts_with("simex_source_"));
        assert!(workdir.join("fast2xy.inp").exists());
        assert_eq!(launcher.invocations()[0].workdir, *workdir);

        let artifact = Dataset::read(calc.io().output()).unwrap();
        assert!(artifact.missing(calc.provided_data()).is_empty());
    }

    #[test]
    fn test_nonzero_exit_keeps_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new().with_script("fast2xy", |workdir| {
            write_raw_outputs(StageKind::Source, workdir)?;
            Ok(1)
        });
        let (runner, _) = runner(&dir.path().join("scratch"), launcher);
        let calc = SourceCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap();

        let report = runner.run(&calc);
        assert_eq!(report.status(), RunStatus::NonZeroExit);
        assert_ne!(report.code(), 0);
        assert_eq!(report.jobs[0].state, RunState::Failed);
        assert!(report.jobs[0].workdir.as_ref().unwrap().is_dir());
        assert!(!calc.io().output().exists());
    }

    #[test]
    fn test_missing_executable_status() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(&dir.path().join("scratch"), ScriptedLauncher::new());
        let calc = SourceCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap();
        assert_eq!(calc.run_with(&runner).status(), RunStatus::ExecutableNotFound);
    }

    #[test]
    fn test_missing_raw_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new().with_script("fast2xy", |workdir| {
            write_raw_outputs(StageKind::Source, workdir)?;
            fs::remove_file(workdir.join("nzc.dat"))?;
            Ok(0)
        });
        let (runner, _) = runner(&dir.path().join("scratch"), launcher);
        let calc = SourceCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap();
        assert_eq!(runner.run(&calc).status(), RunStatus::MissingOutput);
    }

    #[test]
    fn test_non_finite_raw_value_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source_out_0000001.json");
        source_artifact(&input);

        let launcher = ScriptedLauncher::new().with_script("wpg_propagate", |workdir| {
            write_raw_outputs(StageKind::Propagator, workdir)?;
            fs::write(workdir.join("fwhm.dat"), "NaN 1.3e-6\n")?;
            Ok(0)
        });
        let (runner, _) = runner(&dir.path().join("scratch"), launcher);
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();

        let report = runner.run(&calc);
        assert_eq!(report.status(), RunStatus::MalformedOutput);
        assert!(report.jobs[0].error.as_deref().unwrap().contains("fwhm.dat"));
        assert!(!calc.io().output().exists());
    }

    #[test]
    fn test_pass_through_then_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source_out_0000001.json");
        source_artifact(&input);

        let (runner, _) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();
        let report = runner.run(&calc);
        assert!(report.is_success(), "{report:?}");

        let workdir = report.jobs[0].workdir.as_ref().unwrap();
        assert!(workdir.join("prop_in.json").exists());

        let artifact = Dataset::read(calc.io().output()).unwrap();
        // Carried over from the source.
        assert_eq!(artifact.value("/params/photonEnergy"), Some(&DatasetValue::Float(1.0)));
        // Overwritten by the propagator's own field.
        match artifact.value("/data/arrEhor") {
            Some(DatasetValue::Array(a)) => assert_eq!(a.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
        assert!(artifact.contains("/misc/xFWHM"));
    }

    #[test]
    fn test_unreadable_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("garbage.json");
        fs::write(&input, "not an artifact").unwrap();
        let (runner, _) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();
        assert_eq!(runner.run(&calc).status(), RunStatus::UpstreamArtifact);
    }

    #[test]
    fn test_verification_catches_incomplete_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("thin.json");
        Dataset::new().write(&input).unwrap();

        let (runner, _) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&input), None).unwrap();
        assert_eq!(runner.run(&calc).status(), RunStatus::UnfulfilledContract);

        let relaxed = ProcessRunner::with_launcher(
            RuntimeConfig {
                scratch_dir: dir.path().join("scratch"),
                verify_outputs: false,
                ..RuntimeConfig::default()
            },
            Arc::new(ScriptedLauncher::succeeding()),
        );
        assert!(relaxed.run(&calc).is_success());
    }

    #[test]
    fn test_cleanup_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::with_launcher(
            RuntimeConfig {
                scratch_dir: dir.path().join("scratch"),
                cleanup_on_success: true,
                ..RuntimeConfig::default()
            },
            Arc::new(ScriptedLauncher::succeeding()),
        );
        let calc = SourceCalculator::new_in(Some(dir.path()), ParameterInput::Empty, None, None).unwrap();
        let report = runner.run(&calc);
        assert!(report.is_success());
        assert!(report.jobs[0].workdir.is_none());
        assert_eq!(fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }

    fn fan_out(workers: usize) {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("prop");
        fs::create_dir(&inputs).unwrap();
        for i in [3, 0, 2, 1] {
            let mut ds = Dataset::new();
            for p in StageKind::Propagator.schema().provided() {
                ds.insert(p, i as f64, None).unwrap();
            }
            ds.write(&inputs.join(format!("prop_out_{:07}.json", i))).unwrap();
        }
        let structure = dir.path().join("Cu.feff");
        fs::write(&structure, "ATOMS\n0 0 0 0\n").unwrap();

        let runner = ProcessRunner::with_launcher(
            RuntimeConfig {
                scratch_dir: dir.path().join("scratch"),
                worker_count: workers,
                ..RuntimeConfig::default()
            },
            Arc::new(ScriptedLauncher::succeeding()),
        );
        let calc = FeffCalculator::new_in(Some(dir.path()), FeffParameters::new(&structure), Some(&inputs), None)
            .unwrap();
        let report = runner.run(&calc);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.jobs.len(), 4);

        for (i, job) in report.jobs.iter().enumerate() {
            assert_eq!(job.index, i);
            assert_eq!(job.output, dir.path().join("pmi").join(format!("pmi_out_{:07}.json", i)));
            let artifact = Dataset::read(&job.output).unwrap();
            assert_eq!(artifact.value("/version"), Some(&DatasetValue::Float(i as f64)));
        }
        assert_eq!(fs::read_dir(dir.path().join("pmi")).unwrap().count(), 4);
    }

    #[test]
    fn test_fan_out_sequential() {
        fan_out(1);
    }

    #[test]
    fn test_fan_out_worker_pool() {
        fan_out(3);
    }

    #[test]
    fn test_fan_out_output_replaced_by_file() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("source");
        fs::create_dir(&inputs).unwrap();
        source_artifact(&inputs.join("source_out_0000000.json"));

        let (runner, launcher) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&inputs), None).unwrap();

        // Someone replaces the output directory with a file after construction.
        fs::remove_dir(dir.path().join("prop")).unwrap();
        fs::write(dir.path().join("prop"), "precious").unwrap();

        let report = runner.run(&calc);
        assert_eq!(report.status(), RunStatus::OutputLocation);
        assert!(launcher.invocations().is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("prop")).unwrap(), "precious");
    }

    #[test]
    fn test_rerun_into_used_directory() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("source");
        fs::create_dir(&inputs).unwrap();
        for i in 0..2 {
            source_artifact(&inputs.join(format!("source_out_{:07}.json", i)));
        }
        let prop = dir.path().join("prop");
        fs::create_dir(&prop).unwrap();
        fs::write(prop.join("prop_out_0000007.json"), "{}").unwrap();
        fs::write(prop.join("prop_out_0000001.json.partial"), "{").unwrap();

        let (runner, _) = runner(&dir.path().join("scratch"), ScriptedLauncher::succeeding());
        let calc = PropagatorCalculator::new_in(Some(dir.path()), ParameterInput::Empty, Some(&inputs), None).unwrap();
        let report = runner.run(&calc);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.jobs.len(), 2);

        let mut left: Vec<String> = fs::read_dir(&prop)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, ["prop_out_0000000.json", "prop_out_0000001.json"]);
    }
}
