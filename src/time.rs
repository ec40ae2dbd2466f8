// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Wall-clock plus musical clock: beat ↔ seconds conversion and cycle
//! tracking across tempo changes. The floating-point shape of
//! `update_tempo`'s end-time rescaling and `get_current_cycle`'s tempo-map
//! walk is deliberately exact, not approximate — a scene mid-wait across a
//! tempo change must land on the same wall-clock deadline a human doing
//! the arithmetic by hand would get.

use std::time::Instant;

/// Converts beats to nanoseconds at a given tempo.
pub fn beats_to_ns(beats: f64, tempo: f64) -> u64 {
    (beats * 60.0 / tempo * 1_000_000_000.0).max(0.0) as u64
}

/// Converts seconds to nanoseconds.
pub fn seconds_to_ns(seconds: f64) -> u64 {
    (seconds * 1_000_000_000.0).max(0.0) as u64
}

/// `mode ∈ {beats, seconds}` for a scene's `wait()`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitMode {
    /// Duration in musical beats, converted using the tempo in effect at the
    /// moment the wait begins; a later tempo change rescales the remaining
    /// duration.
    Beats,
    /// Duration in seconds, unaffected by tempo.
    Seconds,
}

/// One segment of the engine's tempo history: the tempo and cycle length in
/// effect starting at `timestamp_ns`.
#[derive(Clone, Copy, Debug)]
pub struct TempoSegment {
    /// Monotonic time this segment began.
    pub timestamp_ns: u64,
    /// Tempo, in beats per minute, during this segment.
    pub tempo: f64,
    /// Cycle length, in quarter notes, during this segment.
    pub cycle_length: f64,
}

/// The engine's history of tempo/cycle-length changes, used to compute the
/// current musical cycle across tempo changes.
#[derive(Clone, Debug)]
pub struct TempoMap {
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Starts a tempo map with an initial tempo/cycle length at `timestamp_ns`.
    pub fn new(timestamp_ns: u64, tempo: f64, cycle_length: f64) -> Self {
        Self {
            segments: vec![TempoSegment {
                timestamp_ns,
                tempo,
                cycle_length,
            }],
        }
    }

    /// Appends a new segment, recording a tempo or cycle-length change.
    pub fn push(&mut self, timestamp_ns: u64, tempo: f64, cycle_length: f64) {
        self.segments.push(TempoSegment {
            timestamp_ns,
            tempo,
            cycle_length,
        });
    }

    /// The tempo/cycle length currently in effect.
    pub fn current(&self) -> TempoSegment {
        *self.segments.last().expect("tempo map is never empty")
    }

    /// Discards history and starts a fresh cycle count from `timestamp_ns`,
    /// as done when a new musical cycle is explicitly started.
    pub fn reset(&mut self, timestamp_ns: u64, tempo: f64, cycle_length: f64) {
        self.segments.clear();
        self.segments.push(TempoSegment {
            timestamp_ns,
            tempo,
            cycle_length,
        });
    }

    /// Sums elapsed cycles across every segment up to `current_time_ns`,
    /// truncating to the integer cycle index.
    pub fn current_cycle(&self, current_time_ns: u64) -> u64 {
        let mut cycles = 0.0;
        let n = self.segments.len();
        for (i, segment) in self.segments.iter().enumerate() {
            let elapsed_ns = if i == n - 1 {
                current_time_ns.saturating_sub(segment.timestamp_ns)
            } else {
                self.segments[i + 1]
                    .timestamp_ns
                    .saturating_sub(segment.timestamp_ns)
            };
            let elapsed_beats = elapsed_ns as f64 / 1_000_000_000.0 / 60.0 * segment.tempo;
            cycles += elapsed_beats / segment.cycle_length;
        }
        cycles as u64
    }
}

/// Monotonic nanoseconds since an arbitrary but fixed per-process epoch.
/// Only relative differences are meaningful.
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock {
    /// Nanoseconds elapsed since this clock was created.
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// A scene's private musical timer: tracks the wall-clock deadline of its
/// current `wait()` and rescales it in place when the engine's tempo
/// changes mid-wait. Distinct from the engine-wide [TempoMap] above, which
/// this timer reads to learn the current tempo but doesn't own.
#[derive(Clone, Debug)]
pub struct MusicalTimer {
    /// When the current wait (or the scene) started.
    pub start_time_ns: u64,
    /// Tempo in effect when the current wait began.
    pub tempo: f64,
    /// Wall-clock deadline of the current wait.
    pub end_time_ns: u64,
    /// Whether the current wait is beat-based (and so eligible for
    /// rescaling on tempo change).
    pub is_beat_waiting: bool,
}

impl MusicalTimer {
    /// Creates a timer anchored at `start_time_ns`/`tempo`.
    pub fn new(start_time_ns: u64, tempo: f64) -> Self {
        Self {
            start_time_ns,
            tempo,
            end_time_ns: start_time_ns,
            is_beat_waiting: false,
        }
    }

    /// Resets the timer, as done when a scene restarts.
    pub fn reset(&mut self, current_time_ns: u64, tempo: f64) {
        self.start_time_ns = current_time_ns;
        self.tempo = tempo;
        self.end_time_ns = current_time_ns;
        self.is_beat_waiting = false;
    }

    /// Called when the engine's tempo changes. If a beat-based wait is in
    /// progress, rescales the remaining time by the tempo ratio so the
    /// deadline reflects the new tempo: the realized duration becomes
    /// `f·d·60/τ₀ + (1-f)·d·60/τ₁` for the fraction `f` already elapsed at
    /// the old tempo `τ₀` before switching to `τ₁`.
    pub fn update_tempo(&mut self, current_time_ns: u64, new_tempo: f64) {
        if self.is_beat_waiting {
            let remaining_ns = self.end_time_ns.saturating_sub(current_time_ns) as f64;
            let tempo_ratio = new_tempo / self.tempo;
            self.end_time_ns = current_time_ns + (remaining_ns / tempo_ratio) as u64;
        }
        self.tempo = new_tempo;
    }

    /// Begins a new wait of `duration` in `mode`, starting from
    /// `self.start_time_ns`, and returns the wall-clock deadline.
    pub fn begin_wait(&mut self, duration: f64, mode: WaitMode) -> u64 {
        let duration_ns = match mode {
            WaitMode::Beats => {
                self.is_beat_waiting = true;
                beats_to_ns(duration, self.tempo)
            }
            WaitMode::Seconds => seconds_to_ns(duration),
        };
        self.end_time_ns = self.start_time_ns + duration_ns;
        self.end_time_ns
    }

    /// Called when a wait completes: advances `start_time_ns` to the
    /// deadline (not to "now"), so repeated waits don't drift even if user
    /// code between waits took finite time.
    pub fn complete_wait(&mut self) {
        self.start_time_ns = self.end_time_ns;
        self.is_beat_waiting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn tempo_change_mid_beat_wait_rescales_remaining_duration() {
        // wait(1 beat) at tempo 60 = 1s total. Tempo doubles to
        // 120 halfway through (f = 0.5): realized duration =
        // 0.5*1*60/60 + 0.5*1*60/120 = 0.5 + 0.25 = 0.75s.
        let mut timer = MusicalTimer::new(0, 60.0);
        let end = timer.begin_wait(1.0, WaitMode::Beats);
        assert_eq!(end, 1_000_000_000);

        let halfway_ns = 500_000_000;
        timer.update_tempo(halfway_ns, 120.0);

        let expected_ns = 750_000_000u64;
        assert!(
            approx_eq!(f64, timer.end_time_ns as f64, expected_ns as f64, epsilon = 1.0),
            "expected end_time ~{expected_ns}, got {}",
            timer.end_time_ns
        );
    }

    #[test]
    fn seconds_mode_is_unaffected_by_tempo_change() {
        let mut timer = MusicalTimer::new(0, 60.0);
        let end = timer.begin_wait(2.0, WaitMode::Seconds);
        timer.update_tempo(1_000_000_000, 200.0);
        assert_eq!(timer.end_time_ns, end);
    }

    #[test]
    fn complete_wait_advances_from_deadline_not_now() {
        let mut timer = MusicalTimer::new(0, 60.0);
        timer.begin_wait(1.0, WaitMode::Beats);
        timer.complete_wait();
        assert_eq!(timer.start_time_ns, 1_000_000_000);
    }

    #[test]
    fn current_cycle_sums_across_tempo_segments() {
        // 4/4 at 60 bpm: one cycle (4 beats) takes 4 seconds.
        let map = TempoMap::new(0, 60.0, 4.0);
        assert_eq!(map.current_cycle(0), 0);
        assert_eq!(map.current_cycle(4_000_000_000), 1);
        assert_eq!(map.current_cycle(7_999_000_000), 1);
        assert_eq!(map.current_cycle(8_000_000_000), 2);
    }

    #[test]
    fn current_cycle_accounts_for_tempo_change_segments() {
        let mut map = TempoMap::new(0, 60.0, 4.0);
        // First 4s at 60bpm = 1 cycle, then tempo doubles.
        map.push(4_000_000_000, 120.0, 4.0);
        // 2 more seconds at 120bpm = 4 beats = 1 more cycle.
        assert_eq!(map.current_cycle(6_000_000_000), 2);
    }
}
