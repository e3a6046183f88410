//! The clock source that feeds elapsed time into the engine.
//!
//! The `SystemClock` is the single source of real time. It broadcasts a
//! `TickEvent` at the configured resolution, carrying the measured time since
//! the previous tick. Runners only understand whole milliseconds, so the
//! dispatcher pushes each delta through a `DeltaAccumulator` which carries the
//! sub-millisecond remainder forward instead of dropping it.

use crate::config::ClockResolution;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// A single beat of the `SystemClock`.
#[derive(Debug, Clone)]
pub struct TickEvent {
    /// Monotonic tick number, starting at 1.
    pub tick_count: u64,
    /// When this tick was observed.
    pub timestamp: Instant,
    /// Time elapsed since the previous tick.
    pub delta: Duration,
}

/// A ticker that broadcasts `TickEvent`s until told to shut down.
pub struct SystemClock {
    resolution: ClockResolution,
    tick_sender: broadcast::Sender<Arc<TickEvent>>,
}

impl SystemClock {
    pub fn new(
        resolution: ClockResolution,
        tick_sender: broadcast::Sender<Arc<TickEvent>>,
    ) -> Self {
        Self {
            resolution,
            tick_sender,
        }
    }

    /// Runs the ticking loop until a message arrives on `shutdown_rx`.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.resolution.tick_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        let mut tick_count: u64 = 0;
        debug!("SystemClock running with period {:?}.", period);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let now = Instant::now();
                    tick_count += 1;
                    let event = TickEvent {
                        tick_count,
                        timestamp: now,
                        delta: now.duration_since(last),
                    };
                    last = now;
                    trace!("Clock tick #{} ({:?}).", event.tick_count, event.delta);
                    // No subscribers is fine; the engine may not be dispatching yet.
                    self.tick_sender.send(Arc::new(event)).ok();
                }
            }
        }
        debug!("SystemClock stopped after {} ticks.", tick_count);
    }
}

/// Converts `Duration` deltas into whole milliseconds without losing time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeltaAccumulator {
    residue: Duration,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` and returns the whole milliseconds now available.
    pub fn push(&mut self, delta: Duration) -> u64 {
        let total = self.residue.saturating_add(delta);
        let whole_ms = u64::try_from(total.as_millis()).unwrap_or(u64::MAX);
        self.residue = total.saturating_sub(Duration::from_millis(whole_ms));
        whole_ms
    }

    /// Time received but not yet handed out.
    pub fn residue(&self) -> Duration {
        self.residue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_carries_sub_millisecond_remainder() {
        let mut acc = DeltaAccumulator::new();
        assert_eq!(acc.push(Duration::from_micros(16_600)), 16);
        assert_eq!(acc.residue(), Duration::from_micros(600));
        assert_eq!(acc.push(Duration::from_micros(16_600)), 17);
        assert_eq!(acc.residue(), Duration::from_micros(200));
    }

    #[test]
    fn test_accumulator_total_matches_input() {
        let mut acc = DeltaAccumulator::new();
        let handed_out: u64 = (0..60).map(|_| acc.push(Duration::from_micros(16_667))).sum();
        // 60 * 16.667ms = 1000.02ms
        assert_eq!(handed_out, 1_000);
        assert_eq!(acc.residue(), Duration::from_micros(20));
    }

    #[tokio::test]
    async fn test_system_clock_ticks_until_shutdown() {
        let (tick_tx, mut tick_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let clock = SystemClock::new(
            ClockResolution::Custom {
                ticks_per_second: 200,
            },
            tick_tx,
        );
        let handle = tokio::spawn(clock.run(shutdown_rx));

        let first = tick_rx.recv().await.unwrap();
        let second = tick_rx.recv().await.unwrap();
        assert_eq!(first.tick_count, 1);
        assert_eq!(second.tick_count, 2);
        assert!(second.timestamp >= first.timestamp);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
