//! # Stepclock
//!
//! A tick-driven, timed step sequencer for guided, multi-step practices.
//!
//! Stepclock walks an ordered list of timed steps (a meditation countdown, a
//! ritual, a shield activation) in real time, tracking per-step and overall
//! progress and exposing pause, resume, reset and cancel controls.
//!
//! ## Core Concepts
//!
//! - **Sequence**: plain data. An ordered list of `Step`s, each with a
//!   duration in milliseconds and an opaque display payload.
//! - **SequenceRunner**: a pure state machine driven by `tick(delta_ms)`.
//!   Elapsed time that overshoots a step boundary carries into the next step,
//!   so coarse ticks never lose time or skip a step.
//! - **SystemClock**: a ticker that acts as the single source of real time.
//! - **Engine**: hosts any number of independent runners, feeds them clock
//!   ticks and broadcasts strongly-typed events (`SequenceEvent`,
//!   `ProgressEvent`, `SystemEvent`).
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use stepclock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Create a default configuration and the engine.
//!     let engine = StepclockEngine::new(StepclockConfig::default());
//!
//!     // 2. Subscribe to sequence events before starting anything.
//!     let mut events = engine.subscribe_sequence_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Received Sequence Event: {:?}", event);
//!         }
//!     });
//!
//!     // 3. Start a sequence.
//!     let sequence = SequenceBuilder::new("breath", "Box breathing")
//!         .step("inhale", 4_000)
//!         .step("hold", 4_000)
//!         .step("exhale", 4_000)
//!         .build()?;
//!     engine.start_sequence(sequence).await?;
//!
//!     // 4. Run the engine. It will shut down on Ctrl+C.
//!     engine.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Stepclock Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod sequence;
pub mod time;

/// A prelude module for easy importing of the most common Stepclock types.
pub mod prelude {
    pub use crate::common::{RunnerId, SequenceId, StepId};
    pub use crate::components::runner::{RunSnapshot, RunStatus, SequenceRunner, TickReport};
    pub use crate::config::{ClockResolution, StepclockConfig};
    pub use crate::engine::StepclockEngine;
    pub use crate::error::{ConfigError, InvalidReason, SequenceError};
    pub use crate::events::{ProgressEvent, SequenceEvent, SystemEvent};
    pub use crate::sequence::{Sequence, SequenceBuilder, Step, StepPayload};
}
