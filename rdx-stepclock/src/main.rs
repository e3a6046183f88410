use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use stepclock::prelude::*;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs one sequence on a live engine and logs every event until it completes.
#[derive(Debug, Parser)]
#[command(name = "stepdev", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Id of the sequence to run. Defaults to a short built-in demo.
    #[arg(short, long)]
    sequence: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    // 2. Load the configuration and pick the sequence to run.
    let config = StepclockConfig::load(args.config.as_deref())?;
    let sequence = match args.sequence.as_deref() {
        Some(id) => config
            .sequence(id)
            .with_context(|| format!("no sequence named '{}'", id))?,
        None => demo_sequence()?,
    };

    // 3. Create the engine and spawn listeners before anything starts.
    let engine = StepclockEngine::new(config);
    spawn_event_listeners(&engine);
    let mut completion_rx = engine.subscribe_sequence_events();

    // 4. Start the sequence and announce completion through the hook.
    info!(
        "Starting '{}' ({} steps, {}ms).",
        sequence.name,
        sequence.len(),
        sequence.total_duration_ms()
    );
    let runner_id = engine.start_sequence(sequence).await?;
    let hooked = engine
        .on_complete(runner_id, |sequence_id| {
            info!("{} '{}' is complete.", "[HOOK]".green().bold(), sequence_id);
        })
        .await;
    if !hooked {
        warn!("Runner {:?} is gone; completion hook not registered.", runner_id);
    }

    // 5. Run the engine until the sequence completes or Ctrl+C arrives.
    let completed = async move {
        loop {
            match completion_rx.recv().await {
                Ok(SequenceEvent::Completed { id, .. }) if id == runner_id => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    };
    engine
        .run_until(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => signal,
                _ = completed => Ok(()),
            }
        })
        .await?;

    Ok(())
}

/// A few seconds long, so the whole lifecycle is visible at a glance.
fn demo_sequence() -> Result<Sequence, SequenceError> {
    SequenceBuilder::new("demo", "Demo breathing")
        .step_with(
            "inhale",
            2_000,
            StepPayload::new().with("guidance", "Breathe in slowly."),
        )
        .step_with(
            "hold",
            1_000,
            StepPayload::new().with("guidance", "Hold gently."),
        )
        .step_with(
            "exhale",
            2_000,
            StepPayload::new().with("guidance", "Let it all go."),
        )
        .build()
}

/// Spawns several tasks, each subscribing to a different event stream from the engine.
fn spawn_event_listeners(engine: &StepclockEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("{} => {:?}", "[SYSTEM]".blue(), event);
        }
    });

    let mut sequence_rx = engine.subscribe_sequence_events();
    tokio::spawn(async move {
        while let Ok(event) = sequence_rx.recv().await {
            info!("{} => {:?}", "[SEQUENCE]".cyan(), event);
        }
    });

    let mut progress_rx = engine.subscribe_progress_events();
    tokio::spawn(async move {
        while let Ok(event) = progress_rx.recv().await {
            info!(
                "{} => {:>5.1}% overall, step {} at {:>5.1}%",
                "[PROGRESS]".yellow(),
                event.overall_ratio * 100.0,
                event.step_index,
                event.step_ratio * 100.0
            );
        }
    });
}
