// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Scenes: cooperative, named background threads that script a performance
//! over time via `wait`/`wait_next_cycle`/`play_sequence`/`lock`. Rather
//! than raising an exception into the target thread to cancel a scene, a
//! cancelled scene's own thread raises an [std::panic::panic_any] on
//! itself the next time it calls back into [SceneHandle].
//!
//! A scene never touches engine or module state directly: every mutator is
//! packaged as an [Action] and sent down `action_tx`, to be drained on the
//! main thread at the next tick.

use crate::action::Action;
use crate::easing::Mode as EasingMode;
use crate::osc::{OscMessage, Port, Protocol};
use crate::parameter::TimeMode;
use crate::time::{Clock, TempoMap, WaitMode};
use crate::value::Value;
use crossbeam_channel::Sender;
use parking_lot::ReentrantMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often a scene's wait loop polls the shared clock/tempo and its own
/// cancellation flag. Matches the engine's default main-loop period, so a
/// scene's timing resolution is no coarser than the engine's own.
const POLL_PERIOD: Duration = Duration::from_millis(1);

/// A marker a scene's own thread panics with to unwind out of a cancelled
/// wait. Caught at the thread boundary and treated as a normal stop, never
/// logged as a scene fault.
struct SceneCancelled;

/// Tempo/cycle state shared between the engine and every running scene, so
/// a scene's `wait` can notice a mid-wait tempo change without the engine
/// having to push updates to each one individually.
#[derive(Clone)]
pub struct SharedTime {
    clock: Arc<Clock>,
    tempo_map: Arc<Mutex<TempoMap>>,
}

impl SharedTime {
    /// Wraps a clock and tempo map for sharing with scenes.
    pub fn new(clock: Arc<Clock>, tempo_map: Arc<Mutex<TempoMap>>) -> Self {
        Self { clock, tempo_map }
    }

    /// Current monotonic time, nanoseconds since the engine's epoch.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// The tempo in effect right now.
    pub fn tempo(&self) -> f64 {
        self.tempo_map.lock().unwrap().current().tempo
    }

    /// The cycle length (in beats) in effect right now.
    pub fn cycle_length(&self) -> f64 {
        self.tempo_map.lock().unwrap().current().cycle_length
    }

    /// The current cycle index, accounting for every tempo change so far.
    pub fn current_cycle(&self) -> u64 {
        let now = self.now_ns();
        self.tempo_map.lock().unwrap().current_cycle(now)
    }
}

/// The handle a scene body runs with: timing primitives plus every
/// deferred mutator a scene is allowed to call.
pub struct SceneHandle {
    name: String,
    shared: SharedTime,
    timer: crate::time::MusicalTimer,
    cancel: Arc<AtomicBool>,
    main_loop_lock: Arc<ReentrantMutex<()>>,
    action_tx: Sender<Action>,
}

impl SceneHandle {
    fn new(
        name: String,
        shared: SharedTime,
        cancel: Arc<AtomicBool>,
        main_loop_lock: Arc<ReentrantMutex<()>>,
        action_tx: Sender<Action>,
    ) -> Self {
        let now = shared.now_ns();
        let tempo = shared.tempo();
        Self {
            name,
            shared,
            timer: crate::time::MusicalTimer::new(now, tempo),
            cancel,
            main_loop_lock,
            action_tx,
        }
    }

    /// This scene's full hierarchical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_cancelled(&self) {
        if self.cancel.load(Ordering::SeqCst) {
            std::panic::panic_any(SceneCancelled);
        }
    }

    fn send(&self, action: Action) {
        // The engine outlives every scene it spawned, so this can only fail
        // during teardown; dropping the action on the floor is correct
        // there, there's no tick left to apply it to.
        let _ = self.action_tx.send(action);
    }

    /// Blocks the calling (scene) thread until `duration` `mode`-units have
    /// elapsed, rescaling the remaining wait whenever the engine's tempo
    /// changes mid-wait.
    pub fn wait(&mut self, duration: f64, mode: WaitMode) {
        self.timer.tempo = self.shared.tempo();
        self.timer.begin_wait(duration, mode);
        loop {
            self.check_cancelled();
            let now = self.shared.now_ns();
            if now >= self.timer.end_time_ns {
                break;
            }
            if self.timer.is_beat_waiting {
                let current_tempo = self.shared.tempo();
                if (current_tempo - self.timer.tempo).abs() > f64::EPSILON {
                    self.timer.update_tempo(now, current_tempo);
                }
            }
            std::thread::sleep(POLL_PERIOD);
        }
        self.timer.complete_wait();
    }

    /// Blocks until the engine's cycle counter advances, regardless of how
    /// many beats that takes at the tempo in effect at each instant.
    pub fn wait_next_cycle(&mut self) {
        let start_cycle = self.shared.current_cycle();
        loop {
            self.check_cancelled();
            if self.shared.current_cycle() != start_cycle {
                break;
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }

    /// Plays a declarative sequence of beats: each entry is `(beat_offset,
    /// action)`, where `beat_offset` is measured from the start of the
    /// current cycle. Entries must be sorted by `beat_offset`. Waits for
    /// each offset in turn, runs its action, then (if `loop_` is set) waits
    /// out the remainder of the cycle and repeats.
    pub fn play_sequence(&mut self, bars: &[(f64, impl Fn(&mut SceneHandle))], loop_: bool) {
        loop {
            let cycle_start = self.shared.current_cycle();
            let mut elapsed = 0.0;
            for (offset, action) in bars {
                self.check_cancelled();
                if *offset > elapsed {
                    self.wait(*offset - elapsed, WaitMode::Beats);
                    elapsed = *offset;
                }
                action(self);
            }
            if !loop_ {
                break;
            }
            // Wait out whatever's left of this cycle so the next pass
            // starts aligned on a cycle boundary, not wherever the last
            // action happened to finish.
            let cycle_length = self.shared.cycle_length();
            if elapsed < cycle_length {
                self.wait(cycle_length - elapsed, WaitMode::Beats);
            }
            while self.shared.current_cycle() == cycle_start {
                self.check_cancelled();
                std::thread::sleep(POLL_PERIOD);
            }
        }
    }

    /// Acquires the engine's main-loop lock, pausing tick steps 3-8 (animation
    /// advance through outbound flush) for as long as the returned guard is
    /// held. Reentrant, so a scene already holding it (directly or via a
    /// nested call) never deadlocks itself.
    pub fn lock(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.main_loop_lock.lock()
    }

    /// Directly sets a parameter, resolved by module path (submodule names
    /// followed by the parameter name).
    pub fn set(&self, path: &[String], args: Vec<Value>) {
        self.send(Action::Set {
            path: path.to_vec(),
            args,
            force_send: false,
            preserve_animation: false,
        });
    }

    /// Sets a parameter and forces an outbound message even if the value is
    /// unchanged from what was last sent.
    pub fn set_forced(&self, path: &[String], args: Vec<Value>) {
        self.send(Action::Set {
            path: path.to_vec(),
            args,
            force_send: true,
            preserve_animation: false,
        });
    }

    /// Starts or restarts an animation on a parameter, resolved by module
    /// path.
    #[allow(clippy::too_many_arguments)]
    pub fn animate(
        &self,
        path: &[String],
        start: Option<Vec<f64>>,
        end: Vec<f64>,
        duration: f64,
        mode: TimeMode,
        easing_name: impl Into<String>,
        easing_mode: EasingMode,
        loop_: bool,
    ) {
        self.send(Action::Animate {
            path: path.to_vec(),
            start,
            end,
            duration,
            mode,
            tempo: self.shared.tempo(),
            easing_name: easing_name.into(),
            easing_mode,
            loop_,
        });
    }

    /// Stops a running animation, resolved by module path.
    pub fn stop_animate(&self, path: &[String]) {
        self.send(Action::StopAnimate {
            path: path.to_vec(),
        });
    }

    /// Resets one parameter (or every parameter, if `name` is `None`) under
    /// the module at `module_path` to its default value.
    pub fn reset(&self, module_path: &[String], name: Option<String>) {
        self.send(Action::Reset {
            module_path: module_path.to_vec(),
            name,
        });
    }

    /// Sends a raw message to a module's port, bypassing parameter
    /// dirty-tracking.
    pub fn send_raw(&self, protocol: Protocol, port: Port, message: OscMessage) {
        self.send(Action::Send {
            protocol,
            port,
            message,
        });
    }

    /// Changes the engine's tempo.
    pub fn set_tempo(&self, tempo: f64) {
        self.send(Action::SetTempo(tempo));
    }

    /// Changes the engine's cycle length, in beats.
    pub fn set_cycle_length(&self, cycle_length: f64) {
        self.send(Action::SetCycleLength(cycle_length));
    }

    /// Resets the cycle counter to zero, starting a new cycle right now.
    pub fn start_cycle(&self) {
        self.send(Action::StartCycle);
    }

    /// Switches the engine's active route.
    pub fn set_route(&self, name: impl Into<String>) {
        self.send(Action::SetRoute(name.into()));
    }

    /// Starts another scene under the same engine. The body must be
    /// callable more than once, since a restart re-invokes it from scratch
    /// on a fresh thread rather than resuming the cancelled one.
    pub fn start_scene(
        &self,
        name: impl Into<String>,
        body: impl Fn(SceneHandle) + Send + Sync + 'static,
    ) {
        self.send(Action::StartScene {
            name: name.into(),
            body: Arc::new(body),
        });
    }

    /// Stops every running scene whose name matches the fnmatch-style
    /// `pattern`.
    pub fn stop_scene(&self, pattern: impl Into<String>) {
        self.send(Action::StopScene(pattern.into()));
    }

    /// Restarts every running scene whose name matches the fnmatch-style
    /// `pattern`: equivalent to stopping and immediately re-starting each
    /// with the same body, timer reset to now.
    pub fn restart_scene(&self, pattern: impl Into<String>) {
        self.send(Action::RestartScene(pattern.into()));
    }

    /// Asks the engine to restart the whole process once it next reaches a
    /// safe point.
    pub fn request_restart(&self) {
        self.send(Action::RequestRestart);
    }
}

/// Bookkeeping the engine keeps per running scene: enough to cancel it, to
/// test its name against a stop/restart wildcard, and (via `body`) to
/// restart it from scratch.
struct Handle {
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    body: Arc<dyn Fn(SceneHandle) + Send + Sync>,
}

/// The engine's scene registry.
#[derive(Default)]
pub struct SceneRegistry {
    scenes: HashMap<String, Handle>,
}

impl SceneRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `name` running `body` on its own thread. If a scene already
    /// runs under that name, it's cancelled first (asynchronously: this
    /// call doesn't block waiting for the old thread to notice).
    pub fn start(
        &mut self,
        name: String,
        shared: SharedTime,
        main_loop_lock: Arc<ReentrantMutex<()>>,
        action_tx: Sender<Action>,
        body: Arc<dyn Fn(SceneHandle) + Send + Sync>,
    ) {
        self.cancel_and_forget(&name);
        let cancel = Arc::new(AtomicBool::new(false));
        let handle_name = name.clone();
        let thread_cancel = cancel.clone();
        let thread_body = body.clone();
        let join = std::thread::Builder::new()
            .name(format!("scene:{name}"))
            .spawn(move || {
                let handle = SceneHandle::new(
                    handle_name.clone(),
                    shared,
                    thread_cancel,
                    main_loop_lock,
                    action_tx,
                );
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    thread_body(handle);
                }));
                if let Err(payload) = result {
                    if payload.downcast_ref::<SceneCancelled>().is_none() {
                        tracing::error!(scene = %handle_name, "scene panicked");
                    }
                }
            })
            .expect("failed to spawn scene thread");
        self.scenes.insert(
            name,
            Handle {
                cancel,
                join: Some(join),
                body,
            },
        );
    }

    fn cancel_and_forget(&mut self, name: &str) {
        if let Some(mut handle) = self.scenes.remove(name) {
            handle.cancel.store(true, Ordering::SeqCst);
            // Don't join: cancellation is cooperative and may not take
            // effect until the scene's next wait check, and the main loop
            // must not block on that.
            handle.join.take();
        }
    }

    /// Cancels every scene whose name matches the fnmatch-style `pattern`.
    pub fn stop_matching(&mut self, pattern: &str) {
        for name in self.matching_names(pattern) {
            self.cancel_and_forget(&name);
        }
    }

    /// Restarts every scene whose name matches the fnmatch-style `pattern`:
    /// re-spawns each with its original body on a fresh thread, timer
    /// reset to now.
    pub fn restart_matching(
        &mut self,
        pattern: &str,
        shared: SharedTime,
        main_loop_lock: Arc<ReentrantMutex<()>>,
        action_tx: Sender<Action>,
    ) {
        for name in self.matching_names(pattern) {
            let Some(body) = self.scenes.get(&name).map(|h| h.body.clone()) else {
                continue;
            };
            self.start(name, shared.clone(), main_loop_lock.clone(), action_tx.clone(), body);
        }
    }

    /// Names of every currently-registered scene matching `pattern`.
    pub fn matching_names(&self, pattern: &str) -> Vec<String> {
        let regex = match fnmatch_regex::glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(_) => {
                tracing::warn!(pattern, "invalid scene name pattern");
                return Vec::new();
            }
        };
        self.scenes
            .keys()
            .filter(|name| regex.is_match(name))
            .cloned()
            .collect()
    }

    /// Whether a scene is currently registered under `name`.
    pub fn is_running(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Clock;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;

    fn shared_time() -> SharedTime {
        SharedTime::new(
            Arc::new(Clock::default()),
            Arc::new(Mutex::new(TempoMap::new(0, 120.0, 4.0))),
        )
    }

    #[test]
    fn wait_blocks_for_roughly_the_requested_duration() {
        let shared = shared_time();
        let (tx, _rx) = unbounded();
        let mut handle = SceneHandle::new(
            "test".into(),
            shared,
            Arc::new(AtomicBool::new(false)),
            Arc::new(ReentrantMutex::new(())),
            tx,
        );
        let start = std::time::Instant::now();
        handle.wait(0.05, WaitMode::Seconds);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn cancelled_scene_unwinds_with_the_sentinel_not_a_generic_panic() {
        let shared = shared_time();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut handle = SceneHandle::new(
            "test".into(),
            shared,
            cancel,
            Arc::new(ReentrantMutex::new(())),
            unbounded().0,
        );
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.wait(10.0, WaitMode::Seconds)));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .downcast_ref::<SceneCancelled>()
            .is_some());
    }

    #[test]
    fn registry_start_replaces_a_scene_with_the_same_name() {
        let mut registry = SceneRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = unbounded();
        let lock = Arc::new(ReentrantMutex::new(()));

        let first_calls = calls.clone();
        registry.start(
            "a".into(),
            shared_time(),
            lock.clone(),
            tx.clone(),
            Arc::new(move |mut handle: SceneHandle| {
                first_calls.fetch_add(1, Ordering::SeqCst);
                handle.wait(10.0, WaitMode::Seconds);
            }),
        );
        assert!(registry.is_running("a"));

        let second_calls = calls.clone();
        registry.start(
            "a".into(),
            shared_time(),
            lock,
            tx,
            Arc::new(move |_handle: SceneHandle| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(registry.is_running("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn matching_names_supports_glob_wildcards() {
        let mut registry = SceneRegistry::new();
        let (tx, _rx) = unbounded();
        let lock = Arc::new(ReentrantMutex::new(()));
        registry.start(
            "drums/intro".into(),
            shared_time(),
            lock.clone(),
            tx.clone(),
            Arc::new(|_| {}),
        );
        registry.start(
            "bass/intro".into(),
            shared_time(),
            lock,
            tx,
            Arc::new(|_| {}),
        );
        let matches = registry.matching_names("drums/*");
        assert_eq!(matches, vec!["drums/intro".to_string()]);
    }
}
