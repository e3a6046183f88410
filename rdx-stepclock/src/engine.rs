//! The core engine that hosts sequence runners and drives them in real time.

use crate::common::{RunnerId, SequenceId};
use crate::components::runner::{RunSnapshot, RunStatus, SequenceRunner};
use crate::components::watcher::ProgressWatcher;
use crate::config::StepclockConfig;
use crate::error::SequenceError;
use crate::events::{ProgressEvent, SequenceEvent, SystemEvent};
use crate::sequence::Sequence;
use crate::time::{DeltaAccumulator, SystemClock, TickEvent};
use chrono::Utc;
use slotmap::{SecondaryMap, SlotMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// The main Stepclock engine.
///
/// This struct is the central point of control. It holds the configuration,
/// owns every hosted `SequenceRunner`, and drives them from the `SystemClock`.
/// Each runner is independent: the engine routes ticks and commands to it but
/// never shares one run's state with another. The `Engine` is designed to be
/// cloned and shared across tasks, providing a handle to the running instance.
#[derive(Clone)]
pub struct StepclockEngine {
    config: Arc<StepclockConfig>,
    tick_sender: broadcast::Sender<Arc<TickEvent>>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    sequence_event_sender: broadcast::Sender<SequenceEvent>,
    progress_event_sender: broadcast::Sender<ProgressEvent>,
    runners: Arc<RwLock<SlotMap<RunnerId, SequenceRunner>>>,
    progress_watchers: Arc<RwLock<SecondaryMap<RunnerId, ProgressWatcher>>>,
}

// Core implementation block for internal logic.
impl StepclockEngine {
    /// Creates a new `StepclockEngine` with the given configuration.
    pub fn new(config: StepclockConfig) -> Self {
        let capacity = config.engine.channel_capacity.max(1);
        let (tick_sender, _) = broadcast::channel(capacity);
        let (system_event_sender, _) = broadcast::channel(64);
        let (sequence_event_sender, _) = broadcast::channel(capacity);
        let (progress_event_sender, _) = broadcast::channel(capacity);

        Self {
            config: Arc::new(config),
            tick_sender,
            system_event_sender,
            sequence_event_sender,
            progress_event_sender,
            runners: Arc::new(RwLock::new(SlotMap::with_key())),
            progress_watchers: Arc::new(RwLock::new(SecondaryMap::new())),
        }
    }

    /// Runs the engine's main loop until a Ctrl+C signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Runs the engine's main loop until `shutdown` resolves.
    ///
    /// This method will:
    /// 1. Spawn the `SystemClock` task.
    /// 2. Spawn the dispatcher task that turns clock ticks into runner ticks.
    /// 3. Wait for `shutdown`, then stop both tasks.
    pub async fn run_until<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        info!("StepclockEngine starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);

        let clock = SystemClock::new(self.config.resolution.clone(), self.tick_sender.clone());
        let clock_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { clock.run(clock_shutdown_rx).await });

        let dispatcher = self.clone();
        let dispatcher_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { dispatcher.dispatcher_loop(dispatcher_shutdown_rx).await });

        info!("Engine running at {:?}.", self.config.resolution);
        let signal = shutdown.await;

        info!("Shutdown signal received. Broadcasting to all tasks...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("StepclockEngine has shut down.");
        signal?;
        Ok(())
    }

    #[doc(hidden)]
    async fn dispatcher_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick_rx = self.tick_sender.subscribe();
        let mut accumulator = DeltaAccumulator::new();
        let mut last_seen: Option<Instant> = None;
        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: Instant::now(),
            })
            .ok();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                tick = tick_rx.recv() => match tick {
                    Ok(tick) => {
                        // Timestamps rather than per-tick deltas, so lagged ticks lose no time.
                        let delta = match last_seen {
                            Some(previous) => tick.timestamp.saturating_duration_since(previous),
                            None => tick.delta,
                        };
                        last_seen = Some(tick.timestamp);
                        let delta_ms = accumulator.push(delta);
                        trace!("Tick #{} received (+{}ms).", tick.tick_count, delta_ms);
                        if delta_ms > 0 {
                            self.advance(delta_ms).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dispatcher lagged behind the clock by {} ticks.", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    #[doc(hidden)]
    fn emit(&self, event: SequenceEvent) {
        self.sequence_event_sender.send(event).ok();
    }

    #[doc(hidden)]
    fn emit_started(&self, id: RunnerId, runner: &SequenceRunner) {
        self.emit(SequenceEvent::Started {
            id,
            sequence_id: runner.sequence().id.clone(),
        });
        self.emit(SequenceEvent::StepEntered {
            id,
            step_id: runner.current_step().id.clone(),
            step_index: runner.current_step_index(),
        });
    }

    #[doc(hidden)]
    async fn remove_finished(&self, finished: Vec<RunnerId>) {
        if finished.is_empty() || !self.config.engine.auto_remove_finished {
            return;
        }
        let mut runners = self.runners.write().await;
        let mut watchers = self.progress_watchers.write().await;
        for id in finished {
            if runners.remove(id).is_some() {
                watchers.remove(id);
                self.system_event_sender
                    .send(SystemEvent::RunnerRemoved { id })
                    .ok();
            }
        }
    }
}

// Public API implementation block.
impl StepclockEngine {
    /// Validates `sequence`, hosts a new runner for it and starts it.
    ///
    /// Nothing is added to the engine if the sequence is invalid.
    pub async fn start_sequence(&self, sequence: Sequence) -> Result<RunnerId, SequenceError> {
        let runner = SequenceRunner::start(sequence)?;
        let sequence_id = runner.sequence().id.clone();

        let mut runners = self.runners.write().await;
        let id = runners.insert(runner);
        self.progress_watchers
            .write()
            .await
            .insert(id, ProgressWatcher::new(&self.config.progress));

        self.system_event_sender
            .send(SystemEvent::RunnerAdded {
                id,
                sequence_id: sequence_id.clone(),
            })
            .ok();
        if let Some(runner) = runners.get(id) {
            self.emit_started(id, runner);
        }
        info!("Hosting sequence '{}' as {:?}.", sequence_id, id);
        Ok(id)
    }

    /// Looks up a sequence by id in the configuration (then the built-in
    /// library) and starts it. Returns `None` if no such sequence exists.
    pub async fn start_named(&self, sequence_id: &str) -> Option<Result<RunnerId, SequenceError>> {
        let sequence = self.config.sequence(sequence_id)?;
        Some(self.start_sequence(sequence).await)
    }

    /// Delivers `delta_ms` of elapsed time to every running runner.
    ///
    /// The dispatcher calls this on every clock tick. Hosts with their own
    /// clock (or tests) can call it directly without running the engine.
    /// Completion hooks run while the runner table is locked and must not
    /// block.
    pub async fn advance(&self, delta_ms: u64) {
        let mut finished = Vec::new();
        {
            let mut runners = self.runners.write().await;
            let mut watchers = self.progress_watchers.write().await;
            for (id, runner) in runners.iter_mut() {
                if runner.status() != RunStatus::Running {
                    continue;
                }
                let index_before = runner.current_step_index();
                let report = runner.tick(delta_ms);

                for (offset, step_id) in report.completed_steps.iter().enumerate() {
                    self.emit(SequenceEvent::StepCompleted {
                        id,
                        step_id: step_id.clone(),
                        step_index: index_before + offset,
                    });
                }
                if let Some(step_index) = report.entered_step {
                    self.emit(SequenceEvent::StepEntered {
                        id,
                        step_id: runner.current_step().id.clone(),
                        step_index,
                    });
                }
                if let Some(watcher) = watchers.get_mut(id) {
                    let overall_ratio = runner.overall_progress_ratio();
                    if watcher.process(overall_ratio) {
                        self.progress_event_sender
                            .send(ProgressEvent {
                                id,
                                overall_ratio,
                                step_ratio: runner.step_progress_ratio(),
                                step_index: runner.current_step_index(),
                            })
                            .ok();
                    }
                }
                if report.completed {
                    self.emit(SequenceEvent::Completed {
                        id,
                        sequence_id: runner.sequence().id.clone(),
                        finished_at: Utc::now(),
                    });
                    finished.push(id);
                }
            }
        }
        self.remove_finished(finished).await;
    }

    /// Starts a runner that is `Idle` (e.g. after `reset`).
    /// Returns `true` if the runner exists and was started.
    pub async fn begin(&self, id: RunnerId) -> bool {
        let mut runners = self.runners.write().await;
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };
        if !runner.begin() {
            return false;
        }
        self.emit_started(id, runner);
        true
    }

    /// Pauses a running runner. Returns `true` if it was paused.
    pub async fn pause(&self, id: RunnerId) -> bool {
        let paused = self
            .runners
            .write()
            .await
            .get_mut(id)
            .map_or(false, SequenceRunner::pause);
        if paused {
            self.emit(SequenceEvent::Paused { id });
        }
        paused
    }

    /// Resumes a paused runner. Returns `true` if it was resumed.
    pub async fn resume(&self, id: RunnerId) -> bool {
        let resumed = self
            .runners
            .write()
            .await
            .get_mut(id)
            .map_or(false, SequenceRunner::resume);
        if resumed {
            self.emit(SequenceEvent::Resumed { id });
        }
        resumed
    }

    /// Returns a runner to `Idle` at step 0. Returns `true` if the runner exists.
    pub async fn reset(&self, id: RunnerId) -> bool {
        let mut runners = self.runners.write().await;
        let Some(runner) = runners.get_mut(id) else {
            return false;
        };
        runner.reset();
        if let Some(watcher) = self.progress_watchers.write().await.get_mut(id) {
            watcher.rearm();
        }
        self.emit(SequenceEvent::Reset { id });
        true
    }

    /// Cancels a runner that has not finished. Returns `true` if it was cancelled.
    pub async fn cancel(&self, id: RunnerId) -> bool {
        let cancelled = self
            .runners
            .write()
            .await
            .get_mut(id)
            .map_or(false, SequenceRunner::cancel);
        if cancelled {
            self.emit(SequenceEvent::Cancelled { id });
            self.remove_finished(vec![id]).await;
        }
        cancelled
    }

    /// Registers a completion hook on a runner, replacing any previous one.
    ///
    /// The hook runs synchronously on the tick that completes the run.
    /// Returns `true` if the runner exists.
    pub async fn on_complete(
        &self,
        id: RunnerId,
        hook: impl FnMut(&SequenceId) + Send + Sync + 'static,
    ) -> bool {
        match self.runners.write().await.get_mut(id) {
            Some(runner) => {
                runner.on_complete(hook);
                true
            }
            None => false,
        }
    }

    /// Removes a runner from the engine, whatever its status.
    ///
    /// Returns `true` if the runner was found and removed.
    pub async fn remove(&self, id: RunnerId) -> bool {
        let was_removed = self.runners.write().await.remove(id).is_some();
        if was_removed {
            self.progress_watchers.write().await.remove(id);
            self.system_event_sender
                .send(SystemEvent::RunnerRemoved { id })
                .ok();
            debug!("Runner {:?} removed.", id);
        }
        was_removed
    }

    /// Returns a snapshot of one runner.
    pub async fn snapshot(&self, id: RunnerId) -> Option<RunSnapshot> {
        self.runners.read().await.get(id).map(SequenceRunner::snapshot)
    }

    /// Returns snapshots of every hosted runner.
    pub async fn snapshots(&self) -> Vec<(RunnerId, RunSnapshot)> {
        self.runners
            .read()
            .await
            .iter()
            .map(|(id, runner)| (id, runner.snapshot()))
            .collect()
    }

    /// Number of hosted runners.
    pub async fn runner_count(&self) -> usize {
        self.runners.read().await.len()
    }

    /// The configuration this engine was created with.
    pub fn config(&self) -> &StepclockConfig {
        &self.config
    }

    /// Subscribes to the raw `TickEvent` stream from the `SystemClock`.
    pub fn subscribe_tick_events(&self) -> broadcast::Receiver<Arc<TickEvent>> {
        self.tick_sender.subscribe()
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the `SequenceEvent` stream.
    pub fn subscribe_sequence_events(&self) -> broadcast::Receiver<SequenceEvent> {
        self.sequence_event_sender.subscribe()
    }

    /// Subscribes to the `ProgressEvent` stream.
    pub fn subscribe_progress_events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_event_sender.subscribe()
    }
}
