//! Contains common, primitive types shared across the crate.
//!
//! This module defines the identifier types used to name sequences, steps and
//! the runners that drive them. Using distinct types keeps a step id from ever
//! being passed where a sequence id is expected.

use serde::Deserialize;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies a sequence runner hosted by the engine.
    ///
    /// This key is returned when a sequence is started on the engine. It is
    /// guaranteed to be unique and will not be reused, preventing stale ID bugs.
    pub struct RunnerId;
}

/// Identifies a sequence (one guided practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub String);

/// Identifies a step, unique within its sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl SequenceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
