//! Stage registry mapping stage kinds to calculator factories.

use std::collections::HashMap;
use std::path::Path;

use super::traits::{Calculator, StageKind};
use super::{
    FeffCalculator, OrientAndPhaseCalculator, PropagatorCalculator, SingFelCalculator, SourceCalculator,
};
use crate::data::ParameterInput;
use crate::error::CalculatorError;

/// Everything needed to construct one calculator.
#[derive(Debug, Clone, Default)]
pub struct StageRequest<'a> {
    pub parameters: ParameterInput,
    pub input: Option<&'a Path>,
    pub output: Option<&'a Path>,
    /// Directory relative paths resolve against; the current directory if unset.
    pub base_dir: Option<&'a Path>,
    /// Program to run instead of the stage's default executable.
    pub executable: Option<&'a str>,
}

/// Builds a boxed calculator from a request.
pub type CalculatorFactory = fn(StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError>;

/// Registry of available stages.
pub struct StageRegistry {
    factories: HashMap<StageKind, CalculatorFactory>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the five built-in stages registered.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StageKind::Source, build_source);
        registry.register(StageKind::Propagator, build_propagator);
        registry.register(StageKind::Interactor, build_interactor);
        registry.register(StageKind::Diffractor, build_diffractor);
        registry.register(StageKind::Analyzer, build_analyzer);
        registry
    }

    /// Register or replace the factory for a stage kind.
    pub fn register(&mut self, kind: StageKind, factory: CalculatorFactory) {
        self.factories.insert(kind, factory);
    }

    /// Check if a stage is registered.
    pub fn contains(&self, kind: StageKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Get all registered stage kinds.
    pub fn kinds(&self) -> Vec<StageKind> {
        self.factories.keys().copied().collect()
    }

    /// Construct a calculator of the given kind.
    pub fn build(&self, kind: StageKind, request: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
        let factory = self.factories.get(&kind).ok_or(CalculatorError::Unregistered(kind))?;
        factory(request)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new_with_defaults()
    }
}

fn build_source(req: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
    let calc = SourceCalculator::new_in(req.base_dir, req.parameters, req.input, req.output)?;
    Ok(Box::new(match req.executable {
        Some(program) => calc.with_executable(program),
        None => calc,
    }))
}

fn build_propagator(req: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
    let calc = PropagatorCalculator::new_in(req.base_dir, req.parameters, req.input, req.output)?;
    Ok(Box::new(match req.executable {
        Some(program) => calc.with_executable(program),
        None => calc,
    }))
}

fn build_interactor(req: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
    let calc = FeffCalculator::new_in(req.base_dir, req.parameters, req.input, req.output)?;
    Ok(Box::new(match req.executable {
        Some(program) => calc.with_executable(program),
        None => calc,
    }))
}

fn build_diffractor(req: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
    let calc = SingFelCalculator::new_in(req.base_dir, req.parameters, req.input, req.output)?;
    Ok(Box::new(match req.executable {
        Some(program) => calc.with_executable(program),
        None => calc,
    }))
}

fn build_analyzer(req: StageRequest<'_>) -> Result<Box<dyn Calculator>, CalculatorError> {
    let calc = OrientAndPhaseCalculator::new_in(req.base_dir, req.parameters, req.input, req.output)?;
    Ok(Box::new(match req.executable {
        Some(program) => calc.with_executable(program),
        None => calc,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PathError;

    #[test]
    fn test_registry_defaults() {
        let registry = StageRegistry::new_with_defaults();
        for kind in StageKind::ALL {
            assert!(registry.contains(kind));
        }
        assert!(!StageRegistry::new().contains(StageKind::Source));
    }

    #[test]
    fn test_registry_build() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StageRegistry::new_with_defaults();

        let calc = registry
            .build(
                StageKind::Source,
                StageRequest {
                    base_dir: Some(dir.path()),
                    executable: Some("fake_fast2xy"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(calc.kind(), StageKind::Source);
        assert_eq!(calc.executable(), "fake_fast2xy");
        assert_eq!(calc.provided_data(), StageKind::Source.schema().provided());

        let err = registry
            .build(
                StageKind::Analyzer,
                StageRequest {
                    base_dir: Some(dir.path()),
                    ..Default::default()
                },
            )
            .err()
            .unwrap();
        assert!(matches!(err, CalculatorError::Path(PathError::MissingInput { .. })));
    }

    #[test]
    fn test_unregistered_kind() {
        let registry = StageRegistry::new();
        let err = registry.build(StageKind::Diffractor, StageRequest::default()).err().unwrap();
        assert!(matches!(err, CalculatorError::Unregistered(StageKind::Diffractor)));
    }
}
