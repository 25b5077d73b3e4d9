//! Stage system: the calculator contract and the five simulation stages.

pub mod analyzer;
pub mod base;
pub mod diffractor;
pub mod interactor;
pub mod io;
pub mod layout;
pub mod propagator;
pub mod registry;
pub mod source;
pub mod traits;

pub use analyzer::OrientAndPhaseCalculator;
pub use base::CalculatorBase;
pub use diffractor::{SingFelCalculator, SingFelParameters};
pub use interactor::{FeffCalculator, FeffParameters};
pub use io::{Job, StageIo};
pub use propagator::PropagatorCalculator;
pub use registry::{CalculatorFactory, StageRegistry, StageRequest};
pub use source::SourceCalculator;
pub use traits::{Calculator, StageKind};
