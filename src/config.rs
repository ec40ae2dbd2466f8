// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Engine configuration, loaded from a TOML file by the embedding binary.
//! The core never reads this file itself (file I/O is an external
//! collaborator); it only consumes the parsed [Config].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default mainloop tick period.
pub const DEFAULT_MAINLOOP_PERIOD_MS: u64 = 1;

/// Default animation advance period.
pub const DEFAULT_ANIMATION_PERIOD_MS: u64 = 20;

/// Default tempo, in beats per minute.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Default cycle length, in quarter notes (a 4/4 bar).
pub const DEFAULT_CYCLE_LENGTH: f64 = 4.0;

/// How many slices a `fastforward()` request is divided into.
pub const FASTFORWARD_SLICES: u32 = 100;

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This engine's name; the first path segment of every generic OSC
    /// address.
    pub engine_name: String,

    /// Directory holding one JSON snapshot file per saved state, per
    /// module.
    pub state_directory: std::path::PathBuf,

    /// Main loop tick period.
    pub mainloop_period_ms: u64,

    /// Animation advance period.
    pub animation_period_ms: u64,

    /// Initial tempo, in beats per minute.
    pub initial_tempo: f64,

    /// Initial cycle length, in quarter notes.
    pub initial_cycle_length: f64,

    /// Bounded-queue capacity for OSC/MIDI input, the action queue, and the
    /// outbound message queue.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_name: "engine".to_string(),
            state_directory: std::path::PathBuf::from("./state"),
            mainloop_period_ms: DEFAULT_MAINLOOP_PERIOD_MS,
            animation_period_ms: DEFAULT_ANIMATION_PERIOD_MS,
            initial_tempo: DEFAULT_TEMPO,
            initial_cycle_length: DEFAULT_CYCLE_LENGTH,
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Parses a [Config] from TOML text.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The main loop tick period as a [Duration].
    pub fn mainloop_period(&self) -> Duration {
        Duration::from_millis(self.mainloop_period_ms)
    }

    /// The animation advance period as a [Duration].
    pub fn animation_period(&self) -> Duration {
        Duration::from_millis(self.animation_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_expected_periods() {
        let c = Config::default();
        assert_eq!(c.mainloop_period(), Duration::from_millis(1));
        assert_eq!(c.animation_period(), Duration::from_millis(20));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let c = Config::from_toml("engine_name = \"studio\"\ninitial_tempo = 128.0\n").unwrap();
        assert_eq!(c.engine_name, "studio");
        assert_eq!(c.initial_tempo, 128.0);
        assert_eq!(c.initial_cycle_length, DEFAULT_CYCLE_LENGTH);
    }
}
