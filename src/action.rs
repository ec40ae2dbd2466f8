// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The thread-safety trampoline: every public mutator invoked off the main
//! thread is packaged as an [Action] and enqueued; the engine's action-queue
//! drain step applies them on the main thread, which owns all mutable
//! state. This is the only channel through which a
//! [crate::scene::SceneHandle] touches engine/module state.

use crate::easing::Mode as EasingMode;
use crate::osc::{OscMessage, Port, Protocol};
use crate::parameter::TimeMode;
use crate::time::WaitMode;
use crate::value::Value;

/// A deferred call to a public mutator, queued by a scene (or any
/// off-main-thread caller) and drained by the engine's action queue.
pub enum Action {
    /// `Module::set_on_path`.
    Set {
        /// Module path plus final parameter name.
        path: Vec<String>,
        /// New argument values.
        args: Vec<Value>,
        /// Force an outbound message even if unchanged.
        force_send: bool,
        /// Don't cancel a running animation.
        preserve_animation: bool,
    },
    /// `Module::animate_on`, resolved via path.
    Animate {
        /// Module path plus final parameter name.
        path: Vec<String>,
        /// Starting values; `None` borrows the current value.
        start: Option<Vec<f64>>,
        /// Ending values.
        end: Vec<f64>,
        /// Duration, in `mode` units.
        duration: f64,
        /// Beats or seconds.
        mode: TimeMode,
        /// Tempo to use for beat-mode duration conversion (captured at
        /// enqueue time, since by the time this drains the caller's view of
        /// tempo may be stale otherwise).
        tempo: f64,
        /// Easing curve name.
        easing_name: String,
        /// Easing variant.
        easing_mode: EasingMode,
        /// Whether the animation loops.
        loop_: bool,
    },
    /// `Module::stop_animate_on`.
    StopAnimate {
        /// Module path plus final parameter name.
        path: Vec<String>,
    },
    /// `Module::reset`, resolved via an owning module path (`None` name
    /// resets every parameter under that module).
    Reset {
        /// Path to the module to reset within.
        module_path: Vec<String>,
        /// Parameter name, or `None` for "every parameter".
        name: Option<String>,
    },
    /// A raw outbound message sent directly to a module's port, bypassing
    /// parameter dirty-tracking entirely.
    Send {
        /// Destination protocol.
        protocol: Protocol,
        /// Destination port.
        port: Port,
        /// The message itself.
        message: OscMessage,
    },
    /// `Engine::set_tempo`.
    SetTempo(f64),
    /// `Engine::set_cycle_length`.
    SetCycleLength(f64),
    /// `Engine::start_cycle`.
    StartCycle,
    /// `Engine::set_route`.
    SetRoute(String),
    /// `Engine::start_scene`, invoked by a scene starting another scene.
    StartScene {
        /// Full hierarchical scene name.
        name: String,
        /// The scene body, run on its own worker thread once this action
        /// drains. Callable more than once: a later restart re-invokes the
        /// same body on a fresh thread rather than resuming this one.
        body: std::sync::Arc<dyn Fn(crate::scene::SceneHandle) + Send + Sync>,
    },
    /// `Engine::stop_scene` (supports fnmatch wildcards).
    StopScene(String),
    /// `Engine::restart_scene` (supports fnmatch wildcards).
    RestartScene(String),
    /// `Engine::request_restart`.
    RequestRestart,
    /// `Engine::fastforward`.
    Fastforward {
        /// Duration to advance.
        duration: f64,
        /// Beats or seconds.
        mode: WaitMode,
    },
    /// `Module::save_state` / `Engine`'s snapshot API.
    SaveState {
        /// Path to the module whose subtree is being saved.
        module_path: Vec<String>,
        /// Snapshot name.
        name: String,
    },
    /// `Module::load_state` / `Engine`'s snapshot API.
    LoadState {
        /// Path to the module whose subtree is being restored.
        module_path: Vec<String>,
        /// Snapshot name.
        name: String,
        /// Force an outbound message even for unchanged values.
        force_send: bool,
    },
}
