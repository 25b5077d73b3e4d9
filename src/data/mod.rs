//! Data structures shared by every stage: parameters, schemas, artifacts and raw tables.

pub mod dataset;
pub mod params;
pub mod schema;
pub mod table;

pub use dataset::{normalize_path, Dataset, DatasetEntry, DatasetError, DatasetValue};
pub use params::{
    DefaultValue, FloatDomain, ParameterInput, ParameterKind, ParameterSchema, ParameterSet,
    ParameterSpec, ParameterValue, Requirement,
};
pub use schema::DataSchema;
pub use table::{NumericTable, TableError, TableOptions};
