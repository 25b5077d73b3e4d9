//! Pipeline composition: stage *i*'s output is stage *i+1*'s input.
//!
//! A pipeline is checked as a whole before anything runs. Calculators are
//! built one at a time, right before they run, because each input only exists
//! once its upstream stage has produced it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use super::executor::ProcessRunner;
use super::state::{RunReport, RunStatus};
use crate::data::{ParameterInput, ParameterSet};
use crate::error::{CalculatorError, ConfigurationError, ContractViolation, PipelineError};
use crate::stage::{StageKind, StageRegistry, StageRequest};

/// What to do with the remaining stages once one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// Keep going; stages whose input is missing are skipped.
    Continue,
}

/// One planned stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub kind: StageKind,
    pub parameters: ParameterSet,
    pub output: Option<PathBuf>,
    pub executable: Option<String>,
}

impl StagePlan {
    /// Plan a stage, validating its parameters now.
    pub fn new(kind: StageKind, parameters: impl Into<ParameterInput>) -> Result<Self, ConfigurationError> {
        Ok(Self {
            kind,
            parameters: kind.parameter_schema().validate(parameters)?,
            output: None,
            executable: None,
        })
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_executable(mut self, program: impl Into<String>) -> Self {
        self.executable = Some(program.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineFile {
    input: Option<PathBuf>,
    #[serde(default)]
    policy: FailurePolicy,
    #[serde(default, rename = "stage")]
    stages: Vec<StageEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StageEntry {
    kind: StageKind,
    parameters: Option<serde_json::Value>,
    output: Option<PathBuf>,
    executable: Option<String>,
}

/// An ordered chain of stages.
#[derive(Clone)]
pub struct Pipeline {
    input: Option<PathBuf>,
    stages: Vec<StagePlan>,
    policy: FailurePolicy,
    registry: Arc<StageRegistry>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            input: None,
            stages: Vec::new(),
            policy: FailurePolicy::default(),
            registry: Arc::new(StageRegistry::new_with_defaults()),
        }
    }

    /// Input of the first stage.
    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn stage(mut self, plan: StagePlan) -> Self {
        self.stages.push(plan);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_registry(mut self, registry: Arc<StageRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn stages(&self) -> &[StagePlan] {
        &self.stages
    }

    /// Parse a pipeline definition.
    ///
    /// ```toml
    /// input = "fel/FAST2XY.DAT"
    /// policy = "abort"
    ///
    /// [[stage]]
    /// kind = "source"
    ///
    /// [[stage]]
    /// kind = "propagator"
    /// parameters = { number_of_cpus = 4 }
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        let file: PipelineFile = toml::from_str(content)?;
        let mut pipeline = Self::new().with_policy(file.policy);
        pipeline.input = file.input;
        for entry in file.stages {
            let mut plan = StagePlan::new(entry.kind, entry.parameters)?;
            plan.output = entry.output;
            plan.executable = entry.executable;
            pipeline.stages.push(plan);
        }
        Ok(pipeline)
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|source| PipelineError::DefinitionIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the chain without running anything.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let first = self.stages.first().ok_or(PipelineError::Empty)?;
        if first.kind.consumes_artifact() && self.input.is_none() {
            return Err(PipelineError::MissingInput(first.kind));
        }
        if let Some(plan) = self.stages.iter().find(|p| !self.registry.contains(p.kind)) {
            return Err(CalculatorError::Unregistered(plan.kind).into());
        }
        for (i, pair) in self.stages.windows(2).enumerate() {
            let (upstream, downstream) = (pair[0].kind, pair[1].kind);
            let missing = downstream.schema().missing_from(upstream.schema());
            if !missing.is_empty() {
                return Err(ContractViolation {
                    position: i + 1,
                    upstream,
                    downstream,
                    missing,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Run every stage in order.
    ///
    /// Returns `Err` only for problems found before the first stage runs.
    /// Stage failures are reported in the [`PipelineReport`].
    pub fn run(&self, runner: &ProcessRunner) -> Result<PipelineReport, PipelineError> {
        self.validate()?;
        let base_dir = runner.config().base_dir.as_deref();

        info!(stages = self.stages.len(), policy = ?self.policy, "running pipeline");
        let mut outcomes = Vec::with_capacity(self.stages.len());
        let mut input = self.input.clone();
        let mut halted: Option<String> = None;

        for (position, plan) in self.stages.iter().enumerate() {
            if let Some(reason) = &halted {
                outcomes.push(StageOutcome::Skipped {
                    kind: plan.kind,
                    reason: reason.clone(),
                });
                continue;
            }

            let request = StageRequest {
                parameters: ParameterInput::from(&plan.parameters),
                input: input.as_deref(),
                output: plan.output.as_deref(),
                base_dir,
                executable: plan.executable.as_deref(),
            };
            let calc = match self.registry.build(plan.kind, request) {
                Ok(calc) => calc,
                Err(err) if position == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(position, stage = %plan.kind, error = %err, "stage skipped");
                    if self.policy == FailurePolicy::Abort {
                        halted = Some(format!("stage {position} ({}) could not be constructed", plan.kind));
                    }
                    input = None;
                    outcomes.push(StageOutcome::Skipped {
                        kind: plan.kind,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let report = runner.run(calc.as_ref());
            if !report.is_success() && self.policy == FailurePolicy::Abort {
                warn!(position, stage = %plan.kind, code = report.code(), "aborting pipeline");
                halted = Some(format!("stage {position} ({}) failed with status {}", plan.kind, report.code()));
            }
            input = Some(calc.io().output().to_path_buf());
            outcomes.push(StageOutcome::Ran(report));
        }

        let report = PipelineReport { stages: outcomes };
        info!(code = report.code(), "pipeline finished");
        Ok(report)
    }

    /// Run the blocking driver on tokio's blocking pool.
    pub async fn run_async(self, runner: Arc<ProcessRunner>) -> Result<PipelineReport, PipelineError> {
        tokio::task::spawn_blocking(move || self.run(&runner)).await?
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one planned stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Ran(RunReport),
    Skipped { kind: StageKind, reason: String },
}

impl StageOutcome {
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutcome::Ran(report) => report.stage,
            StageOutcome::Skipped { kind, .. } => *kind,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            StageOutcome::Ran(report) => report.status(),
            StageOutcome::Skipped { .. } => RunStatus::NotRun,
        }
    }
}

/// Outcome of a pipeline run, one entry per planned stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub stages: Vec<StageOutcome>,
}

impl PipelineReport {
    /// First nonzero stage status, or 0.
    pub fn code(&self) -> i32 {
        self.stages
            .iter()
            .map(StageOutcome::status)
            .find(|s| !s.is_success())
            .unwrap_or(RunStatus::Ok)
            .code()
    }

    pub fn is_success(&self) -> bool {
        self.code() == 0
    }

    /// Artifacts written by the last stage that ran.
    pub fn final_outputs(&self) -> Vec<&Path> {
        self.stages
            .iter()
            .rev()
            .find_map(|s| match s {
                StageOutcome::Ran(report) => Some(report.outputs()),
                StageOutcome::Skipped { .. } => None,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::process::mock::ScriptedLauncher;
    use crate::stage::{FeffParameters, SingFelParameters};
    use serde_json::json;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("Cu.feff"), "ATOMS\n0.0 0.0 0.0 0\n").unwrap();
            fs::write(dir.path().join("s2e.beam"), "photonEnergy 4972\n").unwrap();
            fs::write(dir.path().join("s2e.geom"), "detectorDist 0.13\n").unwrap();
            fs::write(dir.path().join("FAST2XY.DAT"), "0.0 1.0\n1.0 2.0\n").unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn runner(&self, launcher: ScriptedLauncher) -> (ProcessRunner, Arc<ScriptedLauncher>) {
            let launcher = Arc::new(launcher);
            let config = RuntimeConfig {
                scratch_dir: self.path("scratch"),
                base_dir: Some(self.dir.path().to_path_buf()),
                ..RuntimeConfig::default()
            };
            (ProcessRunner::with_launcher(config, launcher.clone()), launcher)
        }

        fn chain(&self) -> Pipeline {
            Pipeline::new()
                .with_input(self.path("FAST2XY.DAT"))
                .stage(StagePlan::new(StageKind::Source, ParameterInput::Empty).unwrap())
                .stage(StagePlan::new(StageKind::Propagator, ParameterInput::Empty).unwrap())
                .stage(StagePlan::new(StageKind::Interactor, FeffParameters::new(self.path("Cu.feff"))).unwrap())
                .stage(
                    StagePlan::new(
                        StageKind::Diffractor,
                        SingFelParameters::new(self.path("s2e.beam"), self.path("s2e.geom")),
                    )
                    .unwrap(),
                )
                .stage(StagePlan::new(StageKind::Analyzer, ParameterInput::Empty).unwrap())
        }
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(Pipeline::new().validate(), Err(PipelineError::Empty)));

        let no_input = Pipeline::new().stage(StagePlan::new(StageKind::Propagator, ParameterInput::Empty).unwrap());
        assert!(matches!(
            no_input.validate(),
            Err(PipelineError::MissingInput(StageKind::Propagator))
        ));

        let source_only = Pipeline::new().stage(StagePlan::new(StageKind::Source, ParameterInput::Empty).unwrap());
        source_only.validate().unwrap();
    }

    #[test]
    fn test_contract_violation_before_launch() {
        let fx = Fixture::new();
        let pipeline = Pipeline::new()
            .stage(StagePlan::new(StageKind::Source, ParameterInput::Empty).unwrap())
            .stage(StagePlan::new(StageKind::Interactor, FeffParameters::new(fx.path("Cu.feff"))).unwrap());

        let (runner, launcher) = fx.runner(ScriptedLauncher::succeeding());
        match pipeline.run(&runner) {
            Err(PipelineError::Contract(v)) => {
                assert_eq!(v.position, 1);
                assert_eq!(v.upstream, StageKind::Source);
                assert_eq!(v.downstream, StageKind::Interactor);
                assert!(v.missing.contains(&"/misc/xFWHM".to_string()));
            }
            other => panic!("expected contract violation, got {other:?}"),
        }
        assert!(launcher.invocations().is_empty());
    }

    #[test]
    fn test_unregistered_stage() {
        let mut registry = StageRegistry::new();
        registry.register(StageKind::Source, |_| Err(CalculatorError::Unregistered(StageKind::Source)));
        let pipeline = Pipeline::new()
            .with_registry(Arc::new(registry))
            .with_input("in.json")
            .stage(StagePlan::new(StageKind::Analyzer, ParameterInput::Empty).unwrap());
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::Calculator(CalculatorError::Unregistered(StageKind::Analyzer)))
        ));
    }

    #[test]
    fn test_full_chain() {
        let fx = Fixture::new();
        let (runner, launcher) = fx.runner(ScriptedLauncher::succeeding());
        let report = fx.chain().run(&runner).unwrap();

        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.stages.len(), 5);
        let programs: Vec<String> = launcher.invocations().into_iter().map(|i| i.program).collect();
        assert_eq!(
            programs,
            ["fast2xy", "wpg_propagate", "feff85L", "radiationDamageMPI", "orient_and_phase"]
        );

        let last = report.final_outputs();
        assert_eq!(last, vec![fx.path("analysis/analysis_out_0000001.json").as_path()]);
        let artifact = Dataset::read(last[0]).unwrap();
        assert!(artifact.missing(StageKind::Analyzer.schema().provided()).is_empty());
    }

    #[test]
    fn test_abort_skips_remaining() {
        let fx = Fixture::new();
        let (runner, launcher) = fx.runner(ScriptedLauncher::succeeding().with_script("feff85L", |_| Ok(2)));
        let report = fx.chain().run(&runner).unwrap();

        assert_eq!(report.code(), RunStatus::NonZeroExit.code());
        assert_eq!(launcher.invocations().len(), 3);
        assert!(matches!(report.stages[3], StageOutcome::Skipped { kind: StageKind::Diffractor, .. }));
        assert_eq!(report.stages[4].status(), RunStatus::NotRun);
        assert_eq!(report.final_outputs(), Vec::<&Path>::new());
    }

    #[test]
    fn test_continue_runs_what_it_can() {
        let fx = Fixture::new();
        let (runner, launcher) = fx.runner(ScriptedLauncher::succeeding().with_script("feff85L", |_| Ok(2)));
        let report = fx.chain().with_policy(FailurePolicy::Continue).run(&runner).unwrap();

        assert_eq!(report.code(), RunStatus::NonZeroExit.code());
        // The interactor wrote nothing, so the diffractor has no input.
        assert_eq!(launcher.invocations().len(), 3);
        assert_eq!(report.stages[3].status(), RunStatus::NotRun);
        assert_eq!(report.stages[4].status(), RunStatus::NotRun);
    }

    #[test]
    fn test_first_stage_construction_error() {
        let fx = Fixture::new();
        let (runner, _) = fx.runner(ScriptedLauncher::succeeding());
        let pipeline = Pipeline::new()
            .with_input(fx.path("no_such_file.dat"))
            .stage(StagePlan::new(StageKind::Source, ParameterInput::Empty).unwrap());
        assert!(matches!(
            pipeline.run(&runner),
            Err(PipelineError::Calculator(CalculatorError::Path(_)))
        ));
    }

    #[test]
    fn test_from_toml() {
        let fx = Fixture::new();
        let definition = format!(
            r#"
            input = "{input}"
            policy = "continue"

            [[stage]]
            kind = "source"
            parameters = {{ photon_energy = 4972.0 }}

            [[stage]]
            kind = "propagator"
            executable = "my_propagate"
            output = "beam.json"
            "#,
            input = fx.path("FAST2XY.DAT").display()
        );
        let pipeline = Pipeline::from_toml_str(&definition).unwrap();
        assert_eq!(pipeline.policy, FailurePolicy::Continue);
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.stages()[0].parameters.get_float("photon_energy"), Some(4972.0));
        assert_eq!(pipeline.stages()[1].executable.as_deref(), Some("my_propagate"));
        pipeline.validate().unwrap();

        let unknown = Pipeline::from_toml_str("[[stage]]\nkind = \"source\"\nparameters = { colour = 1 }\n");
        assert!(matches!(
            unknown,
            Err(PipelineError::Calculator(CalculatorError::Configuration(
                ConfigurationError::UnknownParameter { .. }
            )))
        ));
        assert!(matches!(
            Pipeline::from_toml_str("[[stage]]\nkind = \"detector\"\n"),
            Err(PipelineError::Definition(_))
        ));
    }

    #[test]
    fn test_stage_plan_validates_parameters() {
        let err = StagePlan::new(StageKind::Analyzer, json!({"number_of_trials": 0})).unwrap_err();
        assert!(matches!(err, ConfigurationError::OutOfDomain { .. } | ConfigurationError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_run_async() {
        let fx = Fixture::new();
        let (runner, _) = fx.runner(ScriptedLauncher::succeeding());
        let report = fx.chain().run_async(Arc::new(runner)).await.unwrap();
        assert!(report.is_success(), "{report:?}");
    }
}
