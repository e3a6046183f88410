use anyhow::Result;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepclock::prelude::*;
use stepclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
const BAR_WIDTH: usize = 30;

const LOGO_TEXT: &str = r#"
   _____ _                  _            _
  / ____| |                | |          | |
 | (___ | |_ ___ _ __   ___| | ___   ___| | __
  \___ \| __/ _ \ '_ \ / __| |/ _ \ / __| |/ /
  ____) | ||  __/ |_) | (__| | (_) | (__|   <
 |_____/ \__\___| .__/ \___|_|\___/ \___|_|\_\
                | |
                |_|
"#;

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", LOGO_TEXT.cyan());
    let rule = "-".repeat(79);
    println!("{}", rule.dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";
    println!("{}", license_blurb.dimmed());
    println!("{}", rule.dimmed());
}

fn progress_bar(ratio: f64) -> String {
    let filled = ((ratio.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn print_snapshot(handle: usize, snapshot: &RunSnapshot) {
    let status = match snapshot.status {
        RunStatus::Running => snapshot.status.as_str().green(),
        RunStatus::Paused => snapshot.status.as_str().yellow(),
        RunStatus::Completed => snapshot.status.as_str().cyan(),
        RunStatus::Cancelled => snapshot.status.as_str().red(),
        RunStatus::Idle => snapshot.status.as_str().dimmed(),
    };
    println!(
        "  #{:<3} {:<24} {:<10} step {}/{} '{}'",
        handle,
        snapshot.sequence_name,
        status,
        snapshot.current_step_index + 1,
        snapshot.total_steps,
        snapshot.current_step_id
    );
    println!(
        "        step    {} {:>5.1}%",
        progress_bar(snapshot.step_ratio),
        snapshot.step_ratio * 100.0
    );
    println!(
        "        overall {} {:>5.1}%  ({}s left)",
        progress_bar(snapshot.overall_ratio),
        snapshot.overall_ratio * 100.0,
        snapshot.remaining_ms / 1_000
    );
}

/// Spawns several tasks, each subscribing to a different event stream from the engine.
fn spawn_event_listeners(engine: &StepclockEngine, is_watching: Arc<AtomicBool>) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM EVENT] {:?}", event);
        }
    });

    // Completion is always announced; step changes only while watching.
    let mut sequence_rx = engine.subscribe_sequence_events();
    let watching = is_watching.clone();
    tokio::spawn(async move {
        while let Ok(event) = sequence_rx.recv().await {
            match event {
                SequenceEvent::Completed {
                    sequence_id,
                    finished_at,
                    ..
                } => {
                    println!(
                        "\n<-- {} '{}' completed at {}\n>> ",
                        "[COMPLETE]".green().bold(),
                        sequence_id,
                        finished_at.format("%H:%M:%S")
                    );
                }
                SequenceEvent::StepEntered {
                    step_id,
                    step_index,
                    ..
                } if watching.load(Ordering::Relaxed) => {
                    println!("<-- [STEP] #{} '{}'", step_index + 1, step_id);
                }
                _ => {}
            }
        }
    });

    let mut progress_rx = engine.subscribe_progress_events();
    tokio::spawn(async move {
        while let Ok(event) = progress_rx.recv().await {
            if is_watching.load(Ordering::Relaxed) {
                println!(
                    "<-- [PROGRESS] {} {:>5.1}%",
                    progress_bar(event.overall_ratio),
                    event.overall_ratio * 100.0
                );
            }
        }
    });
}

/// Maps shell handles (small integers) to engine runner ids.
#[derive(Default)]
struct Handles {
    by_handle: BTreeMap<usize, RunnerId>,
    next_handle: usize,
}

impl Handles {
    fn insert(&mut self, id: RunnerId) -> usize {
        let handle = self.next_handle;
        self.by_handle.insert(handle, id);
        self.next_handle += 1;
        handle
    }

    /// Parses the handle argument, printing usage or an error when it is unusable.
    fn resolve(&self, arg: Option<&&str>, usage: &str) -> Option<(usize, RunnerId)> {
        let Some(raw) = arg else {
            println!("Usage: {}", usage);
            return None;
        };
        let Ok(handle) = raw.trim_start_matches('#').parse::<usize>() else {
            println!("Error: Handle must be a number (e.g., '0', '1').");
            return None;
        };
        match self.by_handle.get(&handle) {
            Some(id) => Some((handle, *id)),
            None => {
                println!(
                    "Error: Invalid handle #{}. Use 'status' to see active runs.",
                    handle
                );
                None
            }
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  sequences             - Lists sequences that can be started.");
    println!("  start <SEQUENCE>      - Starts a sequence and prints its handle.");
    println!("  pause <H>             - Pauses a running sequence.");
    println!("  resume <H>            - Resumes a paused sequence.");
    println!("  reset <H>             - Returns a sequence to the beginning (idle).");
    println!("  begin <H>             - Starts an idle sequence again.");
    println!("  cancel <H>            - Cancels a sequence.");
    println!("  remove <H>            - Removes a sequence from the engine.");
    println!("  status [H]            - Shows progress of one or all sequences.");
    println!("  watch on|off          - Prints step changes and progress milestones.");
    println!("  exit                  - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let config_path = env::var("STEPCLOCK_CONFIG").ok().map(PathBuf::from);
    let config = StepclockConfig::load(config_path.as_deref())?;
    let engine = StepclockEngine::new(config);
    let engine_handle = engine.clone();

    let is_watching = Arc::new(AtomicBool::new(false));
    spawn_event_listeners(&engine_handle, is_watching.clone());

    info!("Spawning {} in the background...", ENGINE_NAME);
    tokio::spawn(async move {
        if let Err(e) = engine.run().await {
            eprintln!("\nEngine stopped with an error: {}", e);
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut handles = Handles::default();

    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    println!(
        "{} is running. Type 'help' for commands or 'exit' to quit.",
        ENGINE_NAME.cyan()
    );

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting stepshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;
        let args = line.split_whitespace().collect::<Vec<_>>();
        let Some(command) = args.first() else {
            continue;
        };

        match *command {
            "sequences" => {
                println!("Available sequences:");
                for sequence in engine_handle.config().available_sequences() {
                    println!(
                        "  {:<14} {:<28} {} steps, {}s",
                        sequence.id.as_str().bold(),
                        sequence.name,
                        sequence.len(),
                        sequence.total_duration_ms() / 1_000
                    );
                }
            }
            "start" => {
                let Some(sequence_id) = args.get(1) else {
                    println!("Usage: start <SEQUENCE>");
                    continue;
                };
                match engine_handle.start_named(sequence_id).await {
                    Some(Ok(id)) => {
                        let handle = handles.insert(id);
                        println!("--> Started '{}' with handle: #{}", sequence_id, handle);
                    }
                    Some(Err(e)) => println!("Error: {}", e),
                    None => println!(
                        "Error: Unknown sequence '{}'. Use 'sequences' to list them.",
                        sequence_id
                    ),
                }
            }
            "pause" | "resume" | "reset" | "begin" | "cancel" => {
                let usage = format!("{} <HANDLE>", command);
                let Some((handle, id)) = handles.resolve(args.get(1), &usage) else {
                    continue;
                };
                let applied = match *command {
                    "pause" => engine_handle.pause(id).await,
                    "resume" => engine_handle.resume(id).await,
                    "reset" => engine_handle.reset(id).await,
                    "begin" => engine_handle.begin(id).await,
                    _ => engine_handle.cancel(id).await,
                };
                if applied {
                    println!("--> #{}: {} ok.", handle, command);
                } else {
                    match engine_handle.snapshot(id).await {
                        Some(snapshot) => println!(
                            "--> #{}: nothing to {} (sequence is {}).",
                            handle, command, snapshot.status
                        ),
                        None => println!("--> Error: Sequence #{} is no longer hosted.", handle),
                    }
                }
            }
            "remove" => {
                let Some((handle, id)) = handles.resolve(args.get(1), "remove <HANDLE>") else {
                    continue;
                };
                if engine_handle.remove(id).await {
                    println!("--> Sequence #{} removed.", handle);
                } else {
                    println!("--> Error: Sequence not found in engine.");
                }
                handles.by_handle.remove(&handle);
            }
            "status" => {
                let selected: Vec<(usize, RunnerId)> = match args.get(1) {
                    Some(_) => handles
                        .resolve(args.get(1), "status [HANDLE]")
                        .into_iter()
                        .collect(),
                    None => handles.by_handle.iter().map(|(h, id)| (*h, *id)).collect(),
                };
                if selected.is_empty() {
                    println!("No sequences started yet.");
                }
                for (handle, id) in selected {
                    match engine_handle.snapshot(id).await {
                        Some(snapshot) => print_snapshot(handle, &snapshot),
                        None => println!("  #{:<3} (no longer hosted)", handle),
                    }
                }
            }
            "watch" => match args.get(1) {
                Some(&"on") => {
                    is_watching.store(true, Ordering::Relaxed);
                    println!("--> Watching step changes and progress.");
                }
                Some(&"off") => {
                    is_watching.store(false, Ordering::Relaxed);
                    println!("--> Stopped watching.");
                }
                _ => println!("Usage: watch on|off"),
            },
            "help" => print_help(),
            "exit" => break,
            _ => println!("Unknown command: '{}'. Type 'help'.", line),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0), format!("[{}]", ".".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(1.0), format!("[{}]", "#".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(7.0), progress_bar(1.0));
        assert_eq!(progress_bar(0.5).matches('#').count(), BAR_WIDTH / 2);
    }
}
