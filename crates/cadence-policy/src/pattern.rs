//! Recurrence patterns.
//!
//! The recurrence grammar belongs to a separate compiler. This crate treats
//! a compiled [`Pattern`] as an opaque JSON object and only talks to the
//! compiler through [`PatternCompiler`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{PolicyError, SubTaskId};

/// Key of the recurrence frequency in a pattern spec.
pub const FREQ_TYPE: &str = "freq_type";

/// Frequency assumed when a new schedule's spec names none.
pub const DEFAULT_FREQ_TYPE: &str = "daily";

/// A compiled recurrence pattern as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(Map<String, Value>);

impl Pattern {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every field of `other` over this pattern.
    pub fn overlay(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

/// A (possibly partial) recurrence description handed to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternSpec(Map<String, Value>);

impl PatternSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn from_value(value: Value) -> Result<Self, PolicyError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(PolicyError::Validation(format!(
                "pattern must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Fill in the default frequency if the pattern spec names none.
    pub(crate) fn with_default_frequency(mut self) -> Self {
        self.0
            .entry(FREQ_TYPE)
            .or_insert_with(|| Value::String(DEFAULT_FREQ_TYPE.to_string()));
        self
    }
}

/// A pattern the compiler refused.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PatternError(pub String);

impl From<PatternError> for PolicyError {
    fn from(e: PatternError) -> Self {
        PolicyError::InvalidSchedule(format!("pattern: {}", e))
    }
}

/// Turns a recurrence description into a wire pattern.
///
/// `base` is the schedule's current pattern when editing, so a partial spec
/// only changes the fields it names. `target` is the schedule being edited.
pub trait PatternCompiler: Send + Sync {
    fn compile(
        &self,
        base: Option<&Pattern>,
        patch: &PatternSpec,
        target: Option<SubTaskId>,
    ) -> Result<Pattern, PatternError>;
}

/// Compiler that overlays the patch fields onto the base pattern verbatim.
///
/// Suitable when callers already speak the authority's pattern vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayCompiler;

impl PatternCompiler for OverlayCompiler {
    fn compile(
        &self,
        base: Option<&Pattern>,
        patch: &PatternSpec,
        _target: Option<SubTaskId>,
    ) -> Result<Pattern, PatternError> {
        if let Some(freq) = patch.get(FREQ_TYPE) {
            if !freq.is_string() {
                return Err(PatternError(format!(
                    "{} must be a string, got {}",
                    FREQ_TYPE, freq
                )));
            }
        }

        let mut pattern = base.cloned().unwrap_or_default();
        pattern.overlay(patch.fields());
        Ok(pattern)
    }
}
