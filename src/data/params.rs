//! Stage parameters: declaration, validation and the validated set.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::error::ConfigurationError;

/// A validated parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Canonical absolute path of an existing file.
    Path(PathBuf),
}

impl ParameterValue {
    /// Convert back to the raw JSON form accepted by the validator.
    pub fn to_value(&self) -> Value {
        match self {
            ParameterValue::Bool(b) => Value::Bool(*b),
            ParameterValue::Int(i) => Value::Number((*i).into()),
            ParameterValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            ParameterValue::Text(s) => Value::String(s.clone()),
            ParameterValue::Path(p) => Value::String(p.display().to_string()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Int(i) => write!(f, "{}", i),
            ParameterValue::Float(x) => write!(f, "{}", x),
            ParameterValue::Text(s) => write!(f, "{}", s),
            ParameterValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Admissible range of a float parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatDomain {
    Any,
    /// Strictly greater than zero.
    Positive,
    /// The half-open interval (0, 1].
    UnitInterval,
}

/// Declared type and domain of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterKind {
    Bool,
    PositiveInt,
    NonNegativeInt,
    Float(FloatDomain),
    Choice(&'static [&'static str]),
    ExistingFile,
}

impl ParameterKind {
    fn describe(&self) -> &'static str {
        match self {
            ParameterKind::Bool => "a boolean",
            ParameterKind::PositiveInt => "a positive integer",
            ParameterKind::NonNegativeInt => "a non-negative integer",
            ParameterKind::Float(_) => "a number",
            ParameterKind::Choice(_) => "one of a fixed set of strings",
            ParameterKind::ExistingFile => "a path to an existing file",
        }
    }
}

/// Default value usable in `static` schemas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl DefaultValue {
    fn to_parameter(self) -> ParameterValue {
        match self {
            DefaultValue::Bool(b) => ParameterValue::Bool(b),
            DefaultValue::Int(i) => ParameterValue::Int(i),
            DefaultValue::Float(f) => ParameterValue::Float(f),
            DefaultValue::Text(s) => ParameterValue::Text(s.to_string()),
        }
    }
}

/// What happens when a parameter is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Requirement {
    Required,
    /// Absent stays absent.
    Optional,
    Default(DefaultValue),
}

/// Declaration of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub requirement: Requirement,
}

impl ParameterSpec {
    pub const fn required(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Required,
        }
    }

    pub const fn optional(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Optional,
        }
    }

    pub const fn with_default(name: &'static str, kind: ParameterKind, default: DefaultValue) -> Self {
        Self {
            name,
            kind,
            requirement: Requirement::Default(default),
        }
    }
}

/// Cross-field check run after every key validated on its own.
pub type ConsistencyCheck = fn(&ParameterSet) -> Result<(), String>;

/// Parameters accepted by one stage type.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSchema {
    /// Stage name used in error messages.
    pub stage: &'static str,
    pub specs: &'static [ParameterSpec],
    pub check: Option<ConsistencyCheck>,
}

impl ParameterSchema {
    pub const fn new(stage: &'static str, specs: &'static [ParameterSpec]) -> Self {
        Self {
            stage,
            specs,
            check: None,
        }
    }

    pub const fn with_check(mut self, check: ConsistencyCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Validate raw input into a [`ParameterSet`].
    pub fn validate(&self, input: impl Into<ParameterInput>) -> Result<ParameterSet, ConfigurationError> {
        let raw = match input.into() {
            ParameterInput::Empty => Map::new(),
            ParameterInput::Validated(set) => set.to_map(),
            ParameterInput::Raw(Value::Null) => Map::new(),
            ParameterInput::Raw(Value::Object(map)) => map,
            ParameterInput::Raw(other) => {
                return Err(ConfigurationError::NotAMapping {
                    stage: self.stage,
                    found: json_type_name(&other),
                })
            }
        };

        if let Some(unknown) = raw.keys().find(|k| self.spec(k).is_none()) {
            return Err(ConfigurationError::UnknownParameter {
                stage: self.stage,
                name: unknown.clone(),
            });
        }

        let mut values = IndexMap::with_capacity(self.specs.len());
        for spec in self.specs {
            match raw.get(spec.name) {
                Some(value) => {
                    values.insert(spec.name.to_string(), self.check_value(spec, value)?);
                }
                None => match spec.requirement {
                    Requirement::Required => {
                        return Err(ConfigurationError::MissingRequired {
                            stage: self.stage,
                            name: spec.name.to_string(),
                        })
                    }
                    Requirement::Optional => {}
                    Requirement::Default(default) => {
                        values.insert(spec.name.to_string(), default.to_parameter());
                    }
                },
            }
        }

        let set = ParameterSet { values };
        if let Some(check) = self.check {
            check(&set).map_err(|reason| ConfigurationError::Inconsistent {
                stage: self.stage,
                reason,
            })?;
        }
        Ok(set)
    }

    fn check_value(&self, spec: &ParameterSpec, value: &Value) -> Result<ParameterValue, ConfigurationError> {
        let wrong_type = || ConfigurationError::WrongType {
            stage: self.stage,
            name: spec.name.to_string(),
            expected: spec.kind.describe(),
        };
        let out_of_domain = |reason: String| ConfigurationError::OutOfDomain {
            stage: self.stage,
            name: spec.name.to_string(),
            reason,
        };

        match spec.kind {
            ParameterKind::Bool => value.as_bool().map(ParameterValue::Bool).ok_or_else(wrong_type),
            ParameterKind::PositiveInt | ParameterKind::NonNegativeInt => {
                let int = value.as_i64().ok_or_else(wrong_type)?;
                let min = if spec.kind == ParameterKind::PositiveInt { 1 } else { 0 };
                if int < min {
                    return Err(out_of_domain(format!("{} is below {}", int, min)));
                }
                Ok(ParameterValue::Int(int))
            }
            ParameterKind::Float(domain) => {
                let x = value.as_f64().ok_or_else(wrong_type)?;
                let ok = match domain {
                    FloatDomain::Any => x.is_finite(),
                    FloatDomain::Positive => x.is_finite() && x > 0.0,
                    FloatDomain::UnitInterval => x > 0.0 && x <= 1.0,
                };
                if !ok {
                    return Err(out_of_domain(format!("{} not in {:?} domain", x, domain)));
                }
                Ok(ParameterValue::Float(x))
            }
            ParameterKind::Choice(choices) => {
                let s = value.as_str().ok_or_else(wrong_type)?;
                if !choices.contains(&s) {
                    return Err(out_of_domain(format!("'{}' is not one of {:?}", s, choices)));
                }
                Ok(ParameterValue::Text(s.to_string()))
            }
            ParameterKind::ExistingFile => {
                let s = value.as_str().ok_or_else(wrong_type)?;
                let path = Path::new(s);
                readable_file(path)
                    .map(ParameterValue::Path)
                    .map_err(|_| ConfigurationError::MissingFile {
                        stage: self.stage,
                        name: spec.name.to_string(),
                        path: path.to_path_buf(),
                    })
            }
        }
    }
}

fn readable_file(path: &Path) -> io::Result<PathBuf> {
    let canonical = path.canonicalize()?;
    if !canonical.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    File::open(&canonical)?;
    Ok(canonical)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Anything a calculator accepts as its parameters.
#[derive(Debug, Clone, Default)]
pub enum ParameterInput {
    /// No parameters given; defaults apply.
    #[default]
    Empty,
    /// Raw mapping, usually deserialized from user configuration.
    Raw(Value),
    /// A set validated earlier; it is validated again against the target schema.
    Validated(ParameterSet),
}

impl From<Value> for ParameterInput {
    fn from(value: Value) -> Self {
        ParameterInput::Raw(value)
    }
}

impl From<Option<Value>> for ParameterInput {
    fn from(value: Option<Value>) -> Self {
        value.map(ParameterInput::Raw).unwrap_or_default()
    }
}

impl From<ParameterSet> for ParameterInput {
    fn from(set: ParameterSet) -> Self {
        ParameterInput::Validated(set)
    }
}

impl From<&ParameterSet> for ParameterInput {
    fn from(set: &ParameterSet) -> Self {
        ParameterInput::Validated(set.clone())
    }
}

/// Immutable, validated parameters of one stage, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSet {
    values: IndexMap<String, ParameterValue>,
}

impl ParameterSet {
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            ParameterValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ParameterValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            ParameterValue::Float(x) => Some(*x),
            ParameterValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ParameterValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_path(&self, name: &str) -> Option<&Path> {
        match self.get(name)? {
            ParameterValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn to_map(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect()
    }

    /// Raw JSON mapping equivalent to this set.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Write `name<sep>value` lines in declaration order.
    ///
    /// Booleans are written as `1`/`0` when `numeric_bools` is set.
    pub fn write_key_value(&self, out: &mut dyn Write, sep: &str, numeric_bools: bool) -> io::Result<()> {
        for (name, value) in self.iter() {
            match value {
                ParameterValue::Bool(b) if numeric_bools => writeln!(out, "{}{}{}", name, sep, u8::from(*b))?,
                other => writeln!(out, "{}{}{}", name, sep, other)?,
            }
        }
        Ok(())
    }
}
