// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The trait boundary between the engine core and its external
//! collaborators: concrete OSC/MIDI
//! transports, on-disk state snapshots, and the process-restart mechanics.
//! The core never reaches past these traits into `std::fs`, a socket, or a
//! MIDI driver directly, which is what makes the tick procedure testable
//! without any of them.

use crate::midi::MidiEvent;
use crate::osc::{OscInbound, OscOutbound};
use crate::value::Value;
use std::time::Duration;

/// A named, ordered segment of a snapshot path: either a plain parameter
/// name (owned directly by the saved module) or one or more submodule names
/// followed by a parameter name.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StateEntry {
    /// Path segments leading to the parameter, e.g. `["sub", "param"]`.
    pub path: Vec<String>,
    /// The parameter's dynamic values at snapshot time.
    pub values: Vec<Value>,
}

/// The OSC transport boundary: a bidirectional, non-blocking-on-the-engine
/// channel to zero or more OSC servers.
pub trait OscTransport: Send {
    /// Waits up to `timeout` for the next inbound message; `None` on
    /// timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Option<OscInbound>;

    /// Sends a message. A failure is a transient I/O error:
    /// logged and skipped by the caller, never propagated as fatal.
    fn send(&mut self, message: OscOutbound) -> anyhow::Result<()>;
}

/// The MIDI transport boundary: per-module named virtual ports, a blocking
/// receive, and a non-blocking emit with drain/sync semantics.
pub trait MidiTransport: Send {
    /// Waits up to `timeout` for the next inbound event; `None` on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Option<MidiEvent>;

    /// Queues an event for sending. Does not block; a full internal buffer
    /// is reported as an error so the caller can retry the drain next tick.
    fn send(&mut self, event: MidiEvent) -> anyhow::Result<()>;

    /// Flushes any buffered outbound events.
    fn drain(&mut self) -> anyhow::Result<()>;
}

/// The state-snapshot boundary: one JSON file per snapshot, per module.
/// The core reads/writes [StateEntry] lists; the concrete
/// format (JSON-on-disk) lives entirely on the other side of this trait.
pub trait SnapshotStore: Send {
    /// Loads a previously saved snapshot by name. A parse failure must
    /// leave any in-memory state untouched.
    fn load(&self, module_path: &[String], name: &str) -> anyhow::Result<Vec<StateEntry>>;

    /// Atomically replaces the named snapshot.
    fn save(&self, module_path: &[String], name: &str, entries: &[StateEntry]) -> anyhow::Result<()>;
}

/// The process-restart boundary. The core decides *when* to
/// restart (tick step 9); this trait performs the re-exec.
pub trait Restarter: Send {
    /// Tears down is the core's job; this is invoked only once the core has
    /// already released its owned resources and dispatched `restarting`.
    fn request_restart(&self);
}

/// Signals that a restart was requested externally — e.g. by a filesystem
/// watcher noticing a changed source file. The watcher
/// itself (and any concrete file-watching crate) is out of scope; the core
/// only polls this trait once per tick.
pub trait RestartWatcher: Send {
    /// Non-blocking poll: `true` if a restart has been requested since the
    /// last call.
    fn try_recv(&mut self) -> bool;
}

/// A [RestartWatcher] that never signals, used where no embedder-supplied
/// watcher is configured.
#[derive(Default)]
pub struct NoRestartWatcher;
impl RestartWatcher for NoRestartWatcher {
    fn try_recv(&mut self) -> bool {
        false
    }
}

/// A [Restarter] that only logs, used in tests and embedders that disable
/// the restart feature.
#[derive(Default)]
pub struct NoopRestarter;
impl Restarter for NoopRestarter {
    fn request_restart(&self) {
        tracing::warn!("restart requested but no Restarter is configured");
    }
}
