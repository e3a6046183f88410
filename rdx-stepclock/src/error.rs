//! Error types returned by the library.
//!
//! Only sequence construction and configuration loading can fail. Every runner
//! command after a successful start is total.

use crate::common::StepId;
use std::fmt;

/// Why a sequence was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// The sequence has no steps.
    EmptySteps,
    /// A step has a zero duration.
    ZeroDuration { step_id: StepId },
    /// Two steps share the same id.
    DuplicateStepId { step_id: StepId },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::EmptySteps => write!(f, "sequence has no steps"),
            InvalidReason::ZeroDuration { step_id } => {
                write!(f, "step '{}' has a non-positive duration", step_id)
            }
            InvalidReason::DuplicateStepId { step_id } => {
                write!(f, "step id '{}' appears more than once", step_id)
            }
        }
    }
}

/// Errors raised when building or starting a sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("Invalid sequence '{sequence}': {reason}")]
    InvalidSequence {
        sequence: String,
        reason: InvalidReason,
    },
}

impl SequenceError {
    pub(crate) fn invalid(sequence: &str, reason: InvalidReason) -> Self {
        SequenceError::InvalidSequence {
            sequence: sequence.to_string(),
            reason,
        }
    }

    /// Returns the rejection reason.
    pub fn reason(&self) -> &InvalidReason {
        match self {
            SequenceError::InvalidSequence { reason, .. } => reason,
        }
    }
}

/// Errors raised while loading a `StepclockConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Configured sequence rejected: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Duplicate sequence id in configuration: {0}")]
    DuplicateSequence(String),
}
