//! Defines all configuration structures for the Stepclock engine.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`. This allows the engine's tick speed,
//! progress reporting and sequence library to be defined externally from the
//! application code.

use crate::error::ConfigError;
use crate::library;
use crate::sequence::Sequence;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix for environment variable overrides, e.g. `STEPCLOCK_RESOLUTION=high`.
pub const ENV_PREFIX: &str = "STEPCLOCK";

/// The top-level configuration for the `StepclockEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepclockConfig {
    /// The tick speed of the master `SystemClock`.
    #[serde(default = "default_resolution")]
    pub resolution: ClockResolution,

    /// How often progress events are emitted.
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Engine housekeeping behavior.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Sequences defined in the configuration file, in addition to the
    /// built-in library.
    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

/// Defines the operational speed of the `SystemClock`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// ~60 ticks per second. Suitable for animation-frame progress bars.
    High,
    /// ~30 ticks per second. Suitable for general purpose displays.
    Medium,
    /// ~1 tick per second. Suitable for countdown-style displays.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    /// The period between two clock ticks.
    pub fn tick_interval(&self) -> Duration {
        const NANOS_PER_SEC: u64 = 1_000_000_000;
        let ticks_per_second = match self {
            ClockResolution::High => 60,
            ClockResolution::Medium => 30,
            ClockResolution::Low => 1,
            ClockResolution::Custom { ticks_per_second } => (*ticks_per_second).max(1),
        };
        Duration::from_nanos(NANOS_PER_SEC / ticks_per_second)
    }
}

/// Controls `ProgressEvent` emission.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    /// Emit a progress event each time overall progress crosses a multiple of
    /// this many percent. Clamped to `1..=100`.
    #[serde(default = "default_milestone_percent")]
    pub milestone_percent: u8,
}

/// Engine housekeeping options.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Drop runners from the engine once they complete or are cancelled.
    #[serde(default)]
    pub auto_remove_finished: bool,

    /// Capacity of each broadcast event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl StepclockConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `STEPCLOCK_*` environment overrides (nested keys use `__`).
    ///
    /// Every configured sequence is validated before the config is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let loaded: StepclockConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        debug!(
            "Configuration loaded: {:?}, {} configured sequences.",
            loaded.resolution,
            loaded.sequences.len()
        );
        Ok(loaded)
    }

    /// Validates configured sequences and rejects duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for sequence in &self.sequences {
            sequence.validate()?;
            if !seen.insert(sequence.id.as_str()) {
                return Err(ConfigError::DuplicateSequence(sequence.id.to_string()));
            }
        }
        Ok(())
    }

    /// Looks up a sequence by id, preferring configured sequences over the
    /// built-in library.
    pub fn sequence(&self, id: &str) -> Option<Sequence> {
        self.sequences
            .iter()
            .find(|s| s.id.as_str() == id)
            .cloned()
            .or_else(|| library::find(id))
    }

    /// All sequences available to this configuration: configured first, then
    /// built-ins not shadowed by a configured id.
    pub fn available_sequences(&self) -> Vec<Sequence> {
        let mut all = self.sequences.clone();
        for builtin in library::builtin() {
            if !all.iter().any(|s| s.id == builtin.id) {
                all.push(builtin);
            }
        }
        all
    }
}

// --- Default value functions for serde ---

fn default_resolution() -> ClockResolution {
    ClockResolution::Medium
}

fn default_milestone_percent() -> u8 {
    10
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StepclockConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            progress: ProgressConfig::default(),
            engine: EngineConfig::default(),
            sequences: Vec::new(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            milestone_percent: default_milestone_percent(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_remove_finished: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, MutexGuard};

    // `load` reads the process environment; tests that call it take this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets environment variables for its lifetime and removes them on drop.
    struct EnvVars(Vec<&'static str>);

    impl EnvVars {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
            Self(vars.iter().map(|(key, _)| *key).collect())
        }
    }

    impl Drop for EnvVars {
        fn drop(&mut self) {
            for key in &self.0 {
                std::env::remove_var(key);
            }
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_tick_intervals() {
        assert_eq!(ClockResolution::Low.tick_interval(), Duration::from_secs(1));
        assert_eq!(
            ClockResolution::Custom {
                ticks_per_second: 10
            }
            .tick_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(
            ClockResolution::Custom {
                ticks_per_second: 0
            }
            .tick_interval(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_load_sequences_from_toml() {
        let _env = env_lock();
        let file = write_config(
            r#"
resolution = "high"

[progress]
milestone_percent = 25

[[sequences]]
id = "evening"
name = "Evening wind-down"
total_duration_ms = 3000

[[sequences.steps]]
id = "settle"
duration_ms = 1000

[[sequences.steps]]
id = "release"
duration_ms = 2000
payload = { affirmation = "I let the day go" }
"#,
        );
        let config = StepclockConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.resolution, ClockResolution::High);
        assert_eq!(config.progress.milestone_percent, 25);
        assert!(!config.engine.auto_remove_finished);

        let evening = config.sequence("evening").unwrap();
        assert_eq!(evening.total_duration_ms(), 3_000);
        assert_eq!(
            evening.steps[1].payload.get("affirmation"),
            Some("I let the day go")
        );
    }

    #[test]
    fn test_load_rejects_invalid_sequence() {
        let _env = env_lock();
        let file = write_config(
            r#"
[[sequences]]
id = "broken"
name = "Broken"

[[sequences.steps]]
id = "zero"
duration_ms = 0
"#,
        );
        let err = StepclockConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Sequence(_)));
    }

    #[test]
    fn test_load_rejects_duplicate_sequence_ids() {
        let _env = env_lock();
        let file = write_config(
            r#"
[[sequences]]
id = "twice"
name = "One"
steps = [{ id = "a", duration_ms = 10 }]

[[sequences]]
id = "twice"
name = "Two"
steps = [{ id = "a", duration_ms = 10 }]
"#,
        );
        let err = StepclockConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSequence(id) if id == "twice"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let _env = env_lock();
        let err = StepclockConfig::load(Some(Path::new("/nonexistent/stepclock.toml")));
        assert!(matches!(err, Err(ConfigError::Source(_))));
    }

    #[test]
    fn test_environment_overrides_file() {
        let _env = env_lock();
        let _vars = EnvVars::set(&[
            ("STEPCLOCK_RESOLUTION", "high"),
            ("STEPCLOCK_ENGINE__AUTO_REMOVE_FINISHED", "true"),
        ]);

        let from_env = StepclockConfig::load(None).unwrap();
        assert_eq!(from_env.resolution, ClockResolution::High);
        assert!(from_env.engine.auto_remove_finished);

        let file = write_config(
            r#"
resolution = "low"

[engine]
auto_remove_finished = false
channel_capacity = 64
"#,
        );
        let layered = StepclockConfig::load(Some(file.path())).unwrap();
        assert_eq!(layered.resolution, ClockResolution::High);
        assert!(layered.engine.auto_remove_finished);
        assert_eq!(layered.engine.channel_capacity, 64);
    }

    #[test]
    fn test_lookup_falls_back_to_library() {
        let config = StepclockConfig::default();
        assert!(config.sequence("meditation").is_some());
        assert!(config.sequence("does-not-exist").is_none());
        assert_eq!(config.available_sequences().len(), library::builtin().len());
    }
}
