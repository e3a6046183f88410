//! The sequence runner: a pure state machine that walks a `Sequence` in time.
//!
//! A runner knows nothing about real clocks. It is driven entirely by
//! `tick(delta_ms)` calls from whichever clock source the host uses, which
//! makes it usable with the engine's `SystemClock`, an animation frame loop,
//! or a plain test loop.

use crate::common::{SequenceId, StepId};
use crate::error::SequenceError;
use crate::sequence::{Sequence, Step};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A closure invoked once when a run completes, with the sequence id.
pub type CompletionHook = Box<dyn FnMut(&SequenceId) + Send + Sync>;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl RunStatus {
    /// `Completed` and `Cancelled` are terminal; only `reset` leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable progress record of one run.
///
/// Only the owning `SequenceRunner` mutates it; everyone else reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    current_step_index: usize,
    elapsed_in_step_ms: u64,
    status: RunStatus,
    completed_step_ids: HashSet<StepId>,
}

impl RunState {
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn elapsed_in_step_ms(&self) -> u64 {
        self.elapsed_in_step_ms
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn completed_step_ids(&self) -> &HashSet<StepId> {
        &self.completed_step_ids
    }
}

/// What happened during a single `tick`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Steps finished during this tick, in order.
    pub completed_steps: Vec<StepId>,
    /// Index of the step the run is now in, if it changed and the run is still going.
    pub entered_step: Option<usize>,
    /// True only on the tick that completed the run.
    pub completed: bool,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.completed_steps.is_empty() && self.entered_step.is_none() && !self.completed
    }
}

/// An owned view of a runner, for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub sequence_id: SequenceId,
    pub sequence_name: String,
    pub status: RunStatus,
    pub current_step_index: usize,
    pub current_step_id: StepId,
    pub elapsed_in_step_ms: u64,
    pub step_duration_ms: u64,
    pub step_ratio: f64,
    pub overall_ratio: f64,
    pub remaining_ms: u64,
    /// Completed step ids, in sequence order.
    pub completed_step_ids: Vec<StepId>,
    pub total_steps: usize,
}

/// Drives one `Sequence` through its steps.
pub struct SequenceRunner {
    sequence: Arc<Sequence>,
    state: RunState,
    on_complete: Option<CompletionHook>,
}

impl fmt::Debug for SequenceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceRunner")
            .field("sequence", &self.sequence.id)
            .field("state", &self.state)
            .field("has_completion_hook", &self.on_complete.is_some())
            .finish()
    }
}

impl SequenceRunner {
    /// Creates an `Idle` runner for `sequence`.
    ///
    /// Fails with `InvalidSequence` before any state exists if the sequence
    /// has no steps, a zero-length step, or duplicate step ids.
    pub fn new(sequence: impl Into<Arc<Sequence>>) -> Result<Self, SequenceError> {
        let sequence = sequence.into();
        sequence.validate()?;
        Ok(Self {
            sequence,
            state: RunState::default(),
            on_complete: None,
        })
    }

    /// Creates a runner that is already `Running` at step 0.
    pub fn start(sequence: impl Into<Arc<Sequence>>) -> Result<Self, SequenceError> {
        let mut runner = Self::new(sequence)?;
        runner.begin();
        Ok(runner)
    }

    /// Registers the completion hook, replacing any previous one.
    pub fn on_complete(&mut self, hook: impl FnMut(&SequenceId) + Send + Sync + 'static) {
        self.on_complete = Some(Box::new(hook));
    }

    /// `Idle -> Running`. No-op in every other status.
    pub fn begin(&mut self) -> bool {
        if self.state.status != RunStatus::Idle {
            return false;
        }
        self.state.status = RunStatus::Running;
        info!("Sequence '{}' started.", self.sequence.id);
        true
    }

    /// Advances the run by `delta_ms` milliseconds.
    ///
    /// Time that overshoots a step boundary is carried into the next step, so a
    /// single coarse tick can complete several steps. When the last step is
    /// exhausted the run completes and any leftover time is dropped.
    pub fn tick(&mut self, delta_ms: u64) -> TickReport {
        let mut report = TickReport::default();
        if self.state.status != RunStatus::Running {
            return report;
        }
        trace!("Sequence '{}' tick +{}ms.", self.sequence.id, delta_ms);

        let index_before = self.state.current_step_index;
        self.state.elapsed_in_step_ms = self.state.elapsed_in_step_ms.saturating_add(delta_ms);

        loop {
            let step = &self.sequence.steps[self.state.current_step_index];
            if self.state.elapsed_in_step_ms < step.duration_ms {
                break;
            }
            self.state.elapsed_in_step_ms -= step.duration_ms;
            self.state.completed_step_ids.insert(step.id.clone());
            report.completed_steps.push(step.id.clone());
            debug!("Sequence '{}' finished step '{}'.", self.sequence.id, step.id);

            if self.state.current_step_index + 1 == self.sequence.steps.len() {
                self.state.status = RunStatus::Completed;
                self.state.elapsed_in_step_ms = 0;
                report.completed = true;
                info!("Sequence '{}' completed.", self.sequence.id);
                if let Some(hook) = self.on_complete.as_mut() {
                    hook(&self.sequence.id);
                }
                break;
            }
            self.state.current_step_index += 1;
        }

        if !report.completed && self.state.current_step_index != index_before {
            report.entered_step = Some(self.state.current_step_index);
        }
        report
    }

    /// `Running -> Paused`. No-op otherwise.
    pub fn pause(&mut self) -> bool {
        if self.state.status != RunStatus::Running {
            return false;
        }
        self.state.status = RunStatus::Paused;
        debug!("Sequence '{}' paused.", self.sequence.id);
        true
    }

    /// `Paused -> Running`. No-op otherwise.
    pub fn resume(&mut self) -> bool {
        if self.state.status != RunStatus::Paused {
            return false;
        }
        self.state.status = RunStatus::Running;
        debug!("Sequence '{}' resumed.", self.sequence.id);
        true
    }

    /// Returns to a fresh `Idle` state from any status.
    pub fn reset(&mut self) {
        self.state = RunState::default();
        debug!("Sequence '{}' reset.", self.sequence.id);
    }

    /// Moves any non-terminal status to `Cancelled`. The completion hook never fires.
    pub fn cancel(&mut self) -> bool {
        if self.state.status.is_terminal() {
            return false;
        }
        self.state.status = RunStatus::Cancelled;
        info!("Sequence '{}' cancelled.", self.sequence.id);
        true
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn current_step_index(&self) -> usize {
        self.state.current_step_index
    }

    pub fn current_step(&self) -> &Step {
        &self.sequence.steps[self.state.current_step_index]
    }

    pub fn completed_step_ids(&self) -> &HashSet<StepId> {
        &self.state.completed_step_ids
    }

    /// Fraction of the current step that has elapsed, in `[0, 1]`.
    ///
    /// Reported as `1.0` once the run has completed.
    pub fn step_progress_ratio(&self) -> f64 {
        if self.state.status == RunStatus::Completed {
            return 1.0;
        }
        let duration = self.current_step().duration_ms as f64;
        (self.state.elapsed_in_step_ms as f64 / duration).clamp(0.0, 1.0)
    }

    /// Fraction of the whole sequence that has elapsed, by step count, in `[0, 1]`.
    pub fn overall_progress_ratio(&self) -> f64 {
        if self.state.status == RunStatus::Completed {
            return 1.0;
        }
        let steps = self.sequence.steps.len() as f64;
        ((self.state.current_step_index as f64 + self.step_progress_ratio()) / steps)
            .clamp(0.0, 1.0)
    }

    /// Milliseconds left until the run completes.
    pub fn remaining_ms(&self) -> u64 {
        if self.state.status == RunStatus::Completed {
            return 0;
        }
        let consumed: u64 = self.sequence.steps[..self.state.current_step_index]
            .iter()
            .map(|s| s.duration_ms)
            .sum::<u64>()
            + self.state.elapsed_in_step_ms;
        self.sequence.total_duration_ms().saturating_sub(consumed)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let step = self.current_step();
        RunSnapshot {
            sequence_id: self.sequence.id.clone(),
            sequence_name: self.sequence.name.clone(),
            status: self.state.status,
            current_step_index: self.state.current_step_index,
            current_step_id: step.id.clone(),
            elapsed_in_step_ms: self.state.elapsed_in_step_ms,
            step_duration_ms: step.duration_ms,
            step_ratio: self.step_progress_ratio(),
            overall_ratio: self.overall_progress_ratio(),
            remaining_ms: self.remaining_ms(),
            completed_step_ids: self
                .sequence
                .steps
                .iter()
                .filter(|s| self.state.completed_step_ids.contains(&s.id))
                .map(|s| s.id.clone())
                .collect(),
            total_steps: self.sequence.steps.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidReason;
    use crate::sequence::SequenceBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn two_step() -> Sequence {
        SequenceBuilder::new("s", "Scenario")
            .step("a", 1_000)
            .step("b", 2_000)
            .build()
            .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_new_runner_is_idle_and_ignores_ticks() {
        let mut runner = SequenceRunner::new(two_step()).unwrap();
        assert_eq!(runner.status(), RunStatus::Idle);
        assert!(runner.tick(500).is_empty());
        assert_eq!(runner.state().elapsed_in_step_ms(), 0);
    }

    #[test]
    fn test_start_is_running_at_step_zero() {
        let runner = SequenceRunner::start(two_step()).unwrap();
        assert_eq!(runner.status(), RunStatus::Running);
        assert_eq!(runner.current_step_index(), 0);
        assert_eq!(runner.state().elapsed_in_step_ms(), 0);
        assert!(runner.completed_step_ids().is_empty());
    }

    #[test]
    fn test_start_rejects_invalid_sequence() {
        let empty = Sequence::new("e", "Empty", Vec::new());
        let err = SequenceRunner::start(empty).unwrap_err();
        assert_eq!(err.reason(), &InvalidReason::EmptySteps);
    }

    #[test]
    fn test_tick_within_step() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        let report = runner.tick(600);
        assert!(report.completed_steps.is_empty());
        assert_eq!(report.entered_step, None);
        assert_eq!(runner.state().elapsed_in_step_ms(), 600);
        assert!(approx(runner.step_progress_ratio(), 0.6));
        assert!(approx(runner.overall_progress_ratio(), 0.3));
    }

    #[test]
    fn test_tick_carries_remainder_into_next_step() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        runner.tick(600);
        let report = runner.tick(500);
        assert_eq!(report.completed_steps, vec![StepId::new("a")]);
        assert_eq!(report.entered_step, Some(1));
        assert_eq!(runner.current_step_index(), 1);
        assert_eq!(runner.state().elapsed_in_step_ms(), 100);
        assert!(approx(runner.overall_progress_ratio(), 0.525));
    }

    #[test]
    fn test_exact_boundary_advances() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        runner.tick(1_000);
        assert_eq!(runner.current_step_index(), 1);
        assert_eq!(runner.state().elapsed_in_step_ms(), 0);
        assert!(runner.completed_step_ids().contains(&StepId::new("a")));
    }

    #[test]
    fn test_completion_clamps_elapsed_and_drops_excess() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        let report = runner.tick(10_000);
        assert!(report.completed);
        assert_eq!(report.entered_step, None);
        assert_eq!(report.completed_steps.len(), 2);
        assert_eq!(runner.status(), RunStatus::Completed);
        assert_eq!(runner.current_step_index(), 1);
        assert_eq!(runner.state().elapsed_in_step_ms(), 0);
        assert_eq!(runner.overall_progress_ratio(), 1.0);
        assert_eq!(runner.remaining_ms(), 0);
    }

    #[test]
    fn test_completion_hook_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        let counter = fired.clone();
        runner.on_complete(move |id| {
            assert_eq!(id.as_str(), "s");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner.tick(3_000);
        runner.tick(3_000);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_never_fires_hook() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        let counter = fired.clone();
        runner.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner.tick(500);
        assert!(runner.cancel());
        runner.tick(10_000);
        assert_eq!(runner.status(), RunStatus::Cancelled);
        assert_eq!(runner.state().elapsed_in_step_ms(), 500);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_is_noop_when_terminal() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        runner.tick(3_000);
        assert!(!runner.cancel());
        assert_eq!(runner.status(), RunStatus::Completed);
    }

    #[test]
    fn test_pause_and_resume_transitions() {
        let mut runner = SequenceRunner::new(two_step()).unwrap();
        assert!(!runner.pause());
        assert!(!runner.resume());
        runner.begin();
        assert!(runner.pause());
        assert!(!runner.pause());
        assert_eq!(runner.status(), RunStatus::Paused);
        assert!(runner.resume());
        assert_eq!(runner.status(), RunStatus::Running);
    }

    #[test]
    fn test_reset_then_begin_runs_again() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        let counter = fired.clone();
        runner.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner.tick(3_000);
        runner.reset();
        assert_eq!(runner.status(), RunStatus::Idle);
        assert!(runner.begin());
        runner.tick(3_000);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remaining_and_snapshot() {
        let mut runner = SequenceRunner::start(two_step()).unwrap();
        runner.tick(1_500);
        assert_eq!(runner.remaining_ms(), 1_500);

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.sequence_id.as_str(), "s");
        assert_eq!(snapshot.current_step_id.as_str(), "b");
        assert_eq!(snapshot.step_duration_ms, 2_000);
        assert_eq!(snapshot.completed_step_ids, vec![StepId::new("a")]);
        assert_eq!(snapshot.total_steps, 2);
        assert!(approx(snapshot.step_ratio, 0.25));
    }
}
