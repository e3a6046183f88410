//! Defines all public event types broadcast by the Stepclock engine.
//!
//! This module acts as the public API for the engine's event system. Hosts
//! subscribe to these strongly-typed streams to render progress, switch UI
//! phases or record finished practices.

use crate::common::{RunnerId, SequenceId, StepId};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Events related to the lifecycle and state of the engine itself.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the engine's dispatcher begins.
    EngineStarted { timestamp: Instant },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
    /// Fired when a runner is added to the engine.
    RunnerAdded { id: RunnerId, sequence_id: SequenceId },
    /// Fired when a runner is removed from the engine.
    RunnerRemoved { id: RunnerId },
}

/// Lifecycle events of individual sequence runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    /// The run moved from `Idle` to `Running`.
    Started { id: RunnerId, sequence_id: SequenceId },
    /// The run entered a step, including step 0 when it starts.
    StepEntered {
        id: RunnerId,
        step_id: StepId,
        step_index: usize,
    },
    /// A step's full duration elapsed.
    StepCompleted {
        id: RunnerId,
        step_id: StepId,
        step_index: usize,
    },
    Paused { id: RunnerId },
    Resumed { id: RunnerId },
    /// The run went back to `Idle` at step 0.
    Reset { id: RunnerId },
    /// The run was cancelled. No `Completed` event follows.
    Cancelled { id: RunnerId },
    /// The last step finished. Sent exactly once per completed run.
    Completed {
        id: RunnerId,
        sequence_id: SequenceId,
        finished_at: DateTime<Utc>,
    },
}

impl SequenceEvent {
    /// The runner this event belongs to.
    pub fn runner_id(&self) -> RunnerId {
        match self {
            SequenceEvent::Started { id, .. }
            | SequenceEvent::StepEntered { id, .. }
            | SequenceEvent::StepCompleted { id, .. }
            | SequenceEvent::Paused { id }
            | SequenceEvent::Resumed { id }
            | SequenceEvent::Reset { id }
            | SequenceEvent::Cancelled { id }
            | SequenceEvent::Completed { id, .. } => *id,
        }
    }
}

/// Fired when a run's overall progress crosses a configured milestone.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub id: RunnerId,
    pub overall_ratio: f64,
    pub step_ratio: f64,
    pub step_index: usize,
}
