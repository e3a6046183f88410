//! Contains the building blocks driven by the engine.
//!
//! The `runner` module holds the sequence state machine itself; `watcher`
//! holds observers that turn runner state into higher-level events. The
//! `StepclockEngine` manages collections of both.

pub mod runner;
pub mod watcher;
