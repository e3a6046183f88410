//! The step definition table: sequences and the steps they are made of.
//!
//! A `Sequence` is plain data. Its steps carry a duration and an opaque
//! payload that only the presentation layer reads. Sequences can be assembled
//! in code with a `SequenceBuilder` or deserialized from a configuration file.

use crate::common::{SequenceId, StepId};
use crate::error::{InvalidReason, SequenceError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Display data attached to a step (affirmation text, labels, and so on).
///
/// The runner never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct StepPayload(BTreeMap<String, String>);

impl StepPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a labelled value, returning the payload for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One timed unit of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// Milliseconds this step occupies. Must be greater than zero.
    pub duration_ms: u64,
    #[serde(default)]
    pub payload: StepPayload,
}

impl Step {
    pub fn new(id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: StepId::new(id),
            duration_ms,
            payload: StepPayload::default(),
        }
    }

    pub fn with_payload(mut self, payload: StepPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// An ordered, named list of steps representing one guided practice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    pub name: String,
    pub steps: Vec<Step>,
    /// Declared total, kept as metadata only. Step durations are authoritative.
    #[serde(default, rename = "total_duration_ms")]
    pub declared_total_ms: Option<u64>,
}

impl Sequence {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: SequenceId::new(id),
            name: name.into(),
            steps,
            declared_total_ms: None,
        }
    }

    /// Sum of all step durations.
    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Checks that the sequence can be run.
    ///
    /// Rejects an empty step list, any zero-length step and duplicate step ids.
    /// A declared total that disagrees with the step durations is only logged.
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.steps.is_empty() {
            return Err(SequenceError::invalid(
                self.id.as_str(),
                InvalidReason::EmptySteps,
            ));
        }
        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.duration_ms == 0 {
                return Err(SequenceError::invalid(
                    self.id.as_str(),
                    InvalidReason::ZeroDuration {
                        step_id: step.id.clone(),
                    },
                ));
            }
            if !seen.insert(&step.id) {
                return Err(SequenceError::invalid(
                    self.id.as_str(),
                    InvalidReason::DuplicateStepId {
                        step_id: step.id.clone(),
                    },
                ));
            }
        }
        if let Some(declared) = self.declared_total_ms {
            let actual = self.total_duration_ms();
            if declared != actual {
                warn!(
                    "Sequence '{}' declares {}ms but its steps sum to {}ms; using the steps.",
                    self.id, declared, actual
                );
            }
        }
        Ok(())
    }
}

/// Assembles a `Sequence` step by step.
///
/// # Example
/// ```
/// use stepclock::sequence::SequenceBuilder;
///
/// let sequence = SequenceBuilder::new("breath", "Box breathing")
///     .step("inhale", 4_000)
///     .step("hold", 4_000)
///     .step("exhale", 4_000)
///     .build()
///     .unwrap();
/// assert_eq!(sequence.total_duration_ms(), 12_000);
/// ```
#[derive(Debug, Clone)]
pub struct SequenceBuilder {
    sequence: Sequence,
}

impl SequenceBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sequence: Sequence::new(id, name, Vec::new()),
        }
    }

    pub fn step(mut self, id: impl Into<String>, duration_ms: u64) -> Self {
        self.sequence.steps.push(Step::new(id, duration_ms));
        self
    }

    pub fn step_with(
        mut self,
        id: impl Into<String>,
        duration_ms: u64,
        payload: StepPayload,
    ) -> Self {
        self.sequence
            .steps
            .push(Step::new(id, duration_ms).with_payload(payload));
        self
    }

    pub fn declared_total(mut self, total_ms: u64) -> Self {
        self.sequence.declared_total_ms = Some(total_ms);
        self
    }

    /// Validates and returns the sequence.
    pub fn build(self) -> Result<Sequence, SequenceError> {
        self.sequence.validate()?;
        Ok(self.sequence)
    }
}
