// Copyright (c) 2023 Mike Tsao. All rights reserved.

#![warn(missing_docs)]

//! `cuehub` is a live-performance control hub: it routes, transforms, and
//! orchestrates OSC and MIDI messages between external audio, video, and
//! lighting programs, keeps one authoritative view of each program's
//! controllable state, animates that state over musical time, and
//! sequences scripted scenes synchronized to a tempo grid.
//!
//! The [engine] module owns the single-writer main loop that ties
//! everything else here together; start there.

/// The thread-safety trampoline: deferred calls to public mutators,
/// drained by the engine's action queue once per tick.
pub mod action;
/// Structural translation between OSC addresses and MIDI events.
pub mod codec;
/// Engine-wide configuration, loaded from TOML by an embedding binary.
pub mod config;
/// The family of interpolation functions parameter animations use.
pub mod easing;
/// The control hub runtime: the single-writer main loop.
pub mod engine;
/// The configuration-fatal error taxonomy and the `fatal!` helper.
pub mod error;
/// Bubbling event emission with cancellation.
pub mod events;
/// The derived-value graph: [Mapping](mapping::Mapping) and
/// [MetaParameter](mapping::MetaParameter).
pub mod mapping;
/// The MIDI side of the codec.
pub mod midi;
/// A `midir`-backed, background-thread [traits::MidiTransport]
/// implementation.
pub mod midi_transport;
/// The hierarchical parameter namespace.
pub mod module;
/// OSC-side wire types.
pub mod osc;
/// A UDP/TCP/Unix-socket-backed, background-thread
/// [traits::OscTransport] implementation.
pub mod osc_transport;
/// A typed value slot plus its animation state.
pub mod parameter;
/// Process-restart mechanics: the environment-variable marker this
/// crate's default [traits::Restarter] sets and the matching
/// `restarted()` check an embedding binary runs at startup.
pub mod restart;
/// A small pseudo-random number generator used by the `random` easing
/// curve.
pub mod rng;
/// The active-route abstraction.
pub mod route;
/// Cooperative, named "scenes" that script a performance over musical
/// time.
pub mod scene;
/// One JSON file per state snapshot, per module.
pub mod snapshot;
/// Wall-clock plus musical clock.
pub mod time;
/// The trait boundary between the engine core and its external
/// collaborators.
pub mod traits;
/// Unique identifiers for mappings and scenes.
pub mod uid;
/// A tagged-union value type with per-typetag coercion rules.
pub mod value;

/// Recommended imports for an embedding binary.
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::config::Config;
    pub use crate::easing::{Curve, Mode as EasingMode};
    pub use crate::engine::Engine;
    pub use crate::error::EngineError;
    pub use crate::mapping::{Mapping, MetaParameter, ParamPath};
    pub use crate::module::Module;
    pub use crate::osc::{Port, Protocol};
    pub use crate::parameter::TimeMode;
    pub use crate::route::{Route, RouteTable};
    pub use crate::scene::SceneHandle;
    pub use crate::time::WaitMode;
    pub use crate::traits::{MidiTransport, OscTransport, Restarter, RestartWatcher, SnapshotStore};
    pub use crate::value::{TypeTag, Value};
}
