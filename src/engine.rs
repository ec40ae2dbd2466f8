// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The engine: the single-writer main loop that owns every module, drains
//! inbound OSC/MIDI, advances animations, resolves dirty parameters against
//! the mapping graph, drains the action trampoline, and flushes outbound
//! messages — in that order, once per tick.
//!
//! Everything above the [traits](crate::traits) boundary is pure,
//! synchronous, single-threaded logic; the engine is what drives it.

use crate::action::Action;
use crate::codec;
use crate::config::Config;
use crate::error::EngineError;
use crate::events::{self, EventEmitter};
use crate::midi::MidiEvent;
use crate::module::Module;
use crate::osc::{OscInbound, OscMessage, OscOutbound, OscSource, Port, Protocol};
use crate::rng::Rng;
use crate::route::{Route, RouteTable};
use crate::scene::{SceneHandle, SceneRegistry, SharedTime};
use crate::time::{Clock, TempoMap, WaitMode};
use crate::traits::{MidiTransport, OscTransport, Restarter, RestartWatcher, SnapshotStore};
use crate::value::Value;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::ReentrantMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Ensures at most one [Engine] exists in this process, per `spec`'s
/// "exactly one Engine exists process-wide" invariant.
static ENGINE_EXISTS: AtomicBool = AtomicBool::new(false);

struct Fastforward {
    remaining: u32,
    slice_ns: u64,
}

#[derive(Default)]
struct Stats {
    window_start_ns: u64,
    osc_in: u64,
    osc_out: u64,
    midi_in: u64,
    midi_out: u64,
    tick_count: u64,
    tick_time_sum_ns: u64,
    tick_time_max_ns: u64,
}

/// The control hub runtime: every top-level [Module], the route table, the
/// scene registry, and the external-collaborator handles, driven one tick
/// at a time by [Engine::tick].
pub struct Engine {
    config: Config,
    modules: HashMap<String, Module>,
    route_table: RouteTable,
    scenes: SceneRegistry,
    events: EventEmitter,
    rng: Rng,
    clock: Arc<Clock>,
    tempo_map: Arc<Mutex<TempoMap>>,
    time_offset_ns: u64,
    fastforward: Option<Fastforward>,
    last_animation_ns: u64,
    action_tx: Sender<Action>,
    action_rx: Receiver<Action>,
    main_loop_lock: Arc<ReentrantMutex<()>>,
    osc_transport: Box<dyn OscTransport>,
    midi_transport: Box<dyn MidiTransport>,
    snapshot_store: Box<dyn SnapshotStore>,
    restarter: Box<dyn Restarter>,
    restart_watcher: Box<dyn RestartWatcher>,
    restarted: bool,
    restart_requested: bool,
    stopped: bool,
    stats: Stats,
}

impl Engine {
    /// Constructs the engine. `restarted` is the value the embedder derived
    /// from whatever restart-marker mechanism it uses (an environment
    /// variable, typically); the core only reports it back via
    /// [Engine::restarted].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        osc_transport: Box<dyn OscTransport>,
        midi_transport: Box<dyn MidiTransport>,
        snapshot_store: Box<dyn SnapshotStore>,
        restarter: Box<dyn Restarter>,
        restart_watcher: Box<dyn RestartWatcher>,
        restarted: bool,
    ) -> Result<Self, EngineError> {
        if ENGINE_EXISTS.swap(true, Ordering::SeqCst) {
            return Err(EngineError::DuplicateEngine);
        }
        let clock = Arc::new(Clock::default());
        let now = clock.now_ns();
        let tempo_map = Arc::new(Mutex::new(TempoMap::new(
            now,
            config.initial_tempo,
            config.initial_cycle_length,
        )));
        let (action_tx, action_rx) = crossbeam_channel::bounded(config.queue_capacity);
        Ok(Self {
            modules: HashMap::new(),
            route_table: RouteTable::new(),
            scenes: SceneRegistry::new(),
            events: EventEmitter::new(),
            rng: Rng::default(),
            clock,
            tempo_map,
            time_offset_ns: 0,
            fastforward: None,
            last_animation_ns: now,
            action_tx,
            action_rx,
            main_loop_lock: Arc::new(ReentrantMutex::new(())),
            osc_transport,
            midi_transport,
            snapshot_store,
            restarter,
            restart_watcher,
            restarted,
            restart_requested: false,
            stopped: false,
            stats: Stats {
                window_start_ns: now,
                ..Default::default()
            },
            config,
        })
    }

    /// Whether this process was (re)started as the result of a prior
    /// restart request.
    pub fn restarted(&self) -> bool {
        self.restarted
    }

    /// This engine's configured name, the first path segment of every
    /// generic OSC address.
    pub fn name(&self) -> &str {
        &self.config.engine_name
    }

    /// A cloneable handle to the engine's clock and tempo map, for
    /// constructing [SceneHandle]s and other collaborators that need to
    /// read (but not own) musical time.
    pub fn shared_time(&self) -> SharedTime {
        SharedTime::new(self.clock.clone(), self.tempo_map.clone())
    }

    /// Registers a top-level module. Fails (configuration-fatal, per
    /// `spec`) if the name is already taken or its `(protocol, port)` — or
    /// that of any of its submodules — collides with an already-registered
    /// one.
    pub fn add_module(&mut self, module: Module) -> Result<(), EngineError> {
        if self.modules.contains_key(&module.name) {
            return Err(EngineError::DuplicateModule(module.name));
        }
        let mut candidate_ports = Vec::new();
        collect_ports(&module, &mut candidate_ports);
        for (protocol, port) in &candidate_ports {
            if self.modules.values().any(|m| has_port(m, *protocol, port)) {
                return Err(EngineError::PortCollision {
                    protocol: protocol.to_string(),
                    port: port.to_string(),
                });
            }
        }
        let name = module.name.clone();
        self.modules.insert(name.clone(), module);
        self.events
            .dispatch_local(events::names::MODULE_ADDED, &[Value::String(name)]);
        Ok(())
    }

    /// Registers an active-route candidate.
    pub fn add_route(&mut self, route: Box<dyn Route>) {
        let name = route.name().to_string();
        self.route_table.add(route);
        self.events
            .dispatch_local(events::names::ROUTE_ADDED, &[Value::String(name)]);
    }

    /// Switches the active route.
    pub fn set_route(&mut self, name: &str) {
        if self.route_table.set_active(name) {
            self.events
                .dispatch_local(events::names::ROUTE_CHANGED, &[Value::String(name.to_string())]);
        }
    }

    /// Binds an engine-level event callback.
    pub fn on_event(&mut self, event: impl Into<String>, callback: events::Callback) {
        self.events.on(event, callback);
    }

    /// A sender scenes (or any off-main-thread caller) can enqueue
    /// [Action]s on; drained on the main thread at the start of each tick's
    /// action-trampoline step.
    pub fn action_sender(&self) -> Sender<Action> {
        self.action_tx.clone()
    }

    fn resolve_module(&self, path: &[String]) -> Option<&Module> {
        let (top, rest) = path.split_first()?;
        self.modules.get(top)?.resolve_module(rest)
    }

    fn resolve_module_mut(&mut self, path: &[String]) -> Option<&mut Module> {
        let (top, rest) = path.split_first()?;
        self.modules.get_mut(top)?.resolve_module_mut(rest)
    }

    fn set_on_path(
        &mut self,
        path: &[String],
        args: &[Value],
        current_time_ns: u64,
        force_send: bool,
        preserve_animation: bool,
    ) -> bool {
        let Some((name, modules)) = path.split_last() else {
            return false;
        };
        let Some(module) = self.resolve_module_mut(modules) else {
            tracing::warn!(path = ?path, "set: unknown module path");
            return false;
        };
        module.set_on(name, args, current_time_ns, force_send, preserve_animation)
    }

    /// Runs the main loop until a restart is requested, sleeping the
    /// configured mainloop period between ticks.
    pub fn run(&mut self) {
        self.events.dispatch_local(events::names::STARTED, &[]);
        loop {
            self.tick();
            if self.stopped {
                self.events.dispatch_local(events::names::STOPPED, &[]);
                break;
            }
            std::thread::sleep(self.config.mainloop_period());
        }
    }

    /// Requests a graceful stop at the end of the current tick, without
    /// going through the restart/re-exec machinery. Used by an embedder
    /// reacting to e.g. a shutdown signal.
    pub fn stop(&mut self) {
        self.events.dispatch_local(events::names::STOPPING, &[]);
        self.stopped = true;
    }

    /// Runs exactly one tick of the main loop. Exposed separately from
    /// [Engine::run] so tests can drive the loop deterministically without
    /// real sleeps.
    pub fn tick(&mut self) {
        let tick_start = Instant::now();
        let current_time_ns = self.clock.now_ns() + self.time_offset_ns;

        if self.restart_watcher.try_recv() {
            self.restart_requested = true;
        }

        if let Some(ff) = &mut self.fastforward {
            self.time_offset_ns += ff.slice_ns;
            ff.remaining -= 1;
            if ff.remaining == 0 {
                self.fastforward = None;
            }
        }

        {
            let _lock = self.main_loop_lock.lock();

            while let Some(inbound) = self.osc_transport.recv_timeout(Duration::ZERO) {
                self.stats.osc_in += 1;
                self.route_inbound_osc(inbound, current_time_ns);
            }

            while let Some(event) = self.midi_transport.recv_timeout(Duration::ZERO) {
                self.stats.midi_in += 1;
                self.route_inbound_midi(event, current_time_ns);
            }

            let animation_period_ns = self.config.animation_period().as_nanos() as u64;
            if current_time_ns.saturating_sub(self.last_animation_ns) >= animation_period_ns {
                self.last_animation_ns = current_time_ns;
                let mut scratch = VecDeque::new();
                let modules = &mut self.modules;
                let rng = &mut self.rng;
                for module in modules.values_mut() {
                    module.advance_animations(current_time_ns, rng, &mut scratch);
                }
            }

            let mut dirty = VecDeque::new();
            for module in self.modules.values() {
                module.collect_dirty(&mut dirty);
            }
            while let Some((path, name)) = dirty.pop_front() {
                self.emit_dirty(&path, &name, current_time_ns, &mut dirty);
            }
            for module in self.modules.values() {
                module.reset_mapping_latches();
            }

            while let Ok(action) = self.action_rx.try_recv() {
                self.apply_action(action, current_time_ns);
            }
        }

        if let Err(err) = self.midi_transport.drain() {
            tracing::warn!(error = %err, "midi drain incomplete, retrying next tick");
        }

        if self.restart_requested {
            self.events.dispatch_local(events::names::RESTARTING, &[]);
            self.restarter.request_restart();
            self.stopped = true;
        }

        self.record_statistics(tick_start, current_time_ns);
    }

    fn record_statistics(&mut self, tick_start: Instant, current_time_ns: u64) {
        let elapsed_ns = tick_start.elapsed().as_nanos() as u64;
        self.stats.tick_count += 1;
        self.stats.tick_time_sum_ns += elapsed_ns;
        self.stats.tick_time_max_ns = self.stats.tick_time_max_ns.max(elapsed_ns);

        if current_time_ns.saturating_sub(self.stats.window_start_ns) >= 1_000_000_000 {
            let mean_ms = self.stats.tick_time_sum_ns as f64 / self.stats.tick_count as f64 / 1e6;
            let max_ms = self.stats.tick_time_max_ns as f64 / 1e6;
            tracing::info!(
                osc_in = self.stats.osc_in,
                osc_out = self.stats.osc_out,
                midi_in = self.stats.midi_in,
                midi_out = self.stats.midi_out,
                tick_mean_ms = mean_ms,
                tick_max_ms = max_ms,
                "engine statistics"
            );
            self.stats = Stats {
                window_start_ns: current_time_ns,
                ..Default::default()
            };
        }
    }

    // --- Inbound routing (spec.md §4.3) -----------------------------------

    fn find_module_by_port(&self, protocol: Protocol, port_key: &str, url: &str) -> Option<Vec<String>> {
        for module in self.modules.values() {
            if let Some(path) = module.find_by_port(protocol, port_key) {
                return Some(path);
            }
        }
        if url.is_empty() {
            return None;
        }
        for module in self.modules.values() {
            if let Some(path) = module.find_by_port(protocol, url) {
                return Some(path);
            }
        }
        None
    }

    fn run_route_hook_by_path(&mut self, path: &[String], args: &[Value]) -> bool {
        let Some((top, rest)) = path.split_first() else {
            return false;
        };
        let Some(module) = self.modules.get_mut(top).and_then(|m| m.resolve_module_mut(rest)) else {
            return false;
        };
        module.run_route_hook(args).is_break()
    }

    fn route_inbound_osc(&mut self, inbound: OscInbound, current_time_ns: u64) {
        let port_key = inbound.source.port.to_string();
        let dest_path = self.find_module_by_port(inbound.source.protocol, &port_key, &inbound.source.url);

        if let Some(path) = &dest_path {
            if self.run_route_hook_by_path(path, &inbound.message.args) {
                return;
            }
        }

        if self.try_generic_control_api(&inbound.message, current_time_ns) {
            return;
        }

        let protocol_str = inbound.source.protocol.to_string();
        self.route_table
            .dispatch(&protocol_str, &port_key, &inbound.message.address, &inbound.message.args);
    }

    fn route_inbound_midi(&mut self, event: MidiEvent, current_time_ns: u64) {
        let _ = current_time_ns;
        let Some(message) = codec::midi_to_osc(&event.kind) else {
            return;
        };
        let dest_path = self.find_module_by_port(Protocol::Midi, &event.dest, "");
        if let Some(path) = &dest_path {
            if self.run_route_hook_by_path(path, &message.args) {
                return;
            }
        }
        self.route_table.dispatch("midi", &event.dest, &message.address, &message.args);
    }

    /// Resolves `/<engine_name>/<mod>/…/<method_or_parameter>` into the
    /// module tree, invoking a public method or assigning a parameter.
    /// Returns whether the address resolved to anything.
    fn try_generic_control_api(&mut self, message: &OscMessage, current_time_ns: u64) -> bool {
        let segments = message.path_segments();
        if segments.first().copied() != Some(self.config.engine_name.as_str()) {
            return false;
        }
        let rest = &segments[1..];
        // At least a top-level module plus a final method/parameter name.
        if rest.len() < 2 {
            return false;
        }
        let (last, modules) = rest.split_last().expect("checked len >= 2 above");
        let (top, sub) = modules.split_first().expect("checked len >= 2 above");
        let Some(top_module) = self.modules.get_mut(*top) else {
            return false;
        };
        let sub: Vec<String> = sub.iter().map(|s| s.to_string()).collect();
        let Some(target) = top_module.resolve_module_mut(&sub) else {
            return false;
        };
        if target.run_public_method(last, &message.args) {
            return true;
        }
        if target.has(last) {
            target.set_on(last, &message.args, current_time_ns, false, false);
            true
        } else {
            false
        }
    }

    // --- Dirty-parameter drain (spec.md §4.4) ------------------------------

    fn emit_dirty(
        &mut self,
        path: &[String],
        name: &str,
        current_time_ns: u64,
        out: &mut VecDeque<(Vec<String>, String)>,
    ) {
        let Some((top, rest)) = path.split_first() else {
            return;
        };

        let outbound = {
            let Some(module) = self.modules.get_mut(top).and_then(|m| m.resolve_module_mut(rest)) else {
                return;
            };
            let Some(param) = module.parameter_mut(name) else {
                return;
            };
            let forced = param.take_force_pending();
            let should_send = param.address.is_some() && (forced || param.differs_from_last_sent());
            let outbound = if should_send {
                Some((
                    module.protocol,
                    module.port.clone(),
                    param.address.clone().expect("checked is_some above"),
                    param.message_args().to_vec(),
                ))
            } else {
                None
            };
            param.mark_sent();
            outbound
        };

        if let Some((protocol, port, address, args)) = outbound {
            self.send_module_message(protocol, port, OscMessage::new(address, args), current_time_ns);
        }

        let values = self
            .resolve_module(path)
            .and_then(|m| m.get(name))
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        self.dispatch_parameter_changed(top, rest, &values);

        let mut relative = rest.to_vec();
        relative.push(name.to_string());
        if let Some(top_module) = self.modules.get_mut(top) {
            top_module.propagate_chain(&relative, current_time_ns, out);
        }
    }

    fn dispatch_parameter_changed(&self, top: &str, rest: &[String], values: &[Value]) {
        let Some(top_module) = self.modules.get(top) else {
            return;
        };
        let mut chain: Vec<&EventEmitter> = vec![&self.events, &top_module.events];
        let mut cursor = top_module;
        for segment in rest {
            let Some(child) = cursor.child(segment) else {
                break;
            };
            chain.push(&child.events);
            cursor = child;
        }
        events::dispatch_bubbling(&chain, events::names::PARAMETER_CHANGED, values);
    }

    fn send_module_message(&mut self, protocol: Protocol, port: Option<Port>, message: OscMessage, current_time_ns: u64) {
        match protocol {
            Protocol::Midi => {
                let Some(kind) = codec::osc_to_midi(&message) else {
                    tracing::warn!(address = %message.address, "parameter address has no MIDI codec row, dropping");
                    return;
                };
                let dest = port.map(|p| p.to_string()).unwrap_or_default();
                match self.midi_transport.send(MidiEvent::new(kind, dest)) {
                    Ok(()) => self.stats.midi_out += 1,
                    Err(err) => tracing::warn!(error = %err, "midi send failed"),
                }
            }
            Protocol::Nil => {
                tracing::debug!(address = %message.address, "internal module has an outbound address but no transport");
            }
            other => {
                let Some(port) = port else {
                    tracing::warn!(address = %message.address, "module has no port configured, dropping outbound message");
                    return;
                };
                let outbound = OscOutbound {
                    message,
                    destination: OscSource {
                        protocol: other,
                        port,
                        host: String::new(),
                        url: String::new(),
                    },
                    enqueued_at_ns: current_time_ns,
                };
                match self.osc_transport.send(outbound) {
                    Ok(()) => self.stats.osc_out += 1,
                    Err(err) => tracing::warn!(error = %err, "osc send failed"),
                }
            }
        }
    }

    // --- Action trampoline (spec.md §4.1, §9) ------------------------------

    fn apply_action(&mut self, action: Action, current_time_ns: u64) {
        match action {
            Action::Set {
                path,
                args,
                force_send,
                preserve_animation,
            } => {
                self.set_on_path(&path, &args, current_time_ns, force_send, preserve_animation);
            }
            Action::Animate {
                path,
                start,
                end,
                duration,
                mode,
                tempo,
                easing_name,
                easing_mode,
                loop_,
            } => {
                let Some((name, modules)) = path.split_last() else {
                    return;
                };
                if let Some(module) = self.resolve_module_mut(modules) {
                    module.animate_on(
                        name,
                        start,
                        end,
                        duration,
                        mode,
                        tempo,
                        &easing_name,
                        easing_mode,
                        loop_,
                        current_time_ns,
                    );
                }
            }
            Action::StopAnimate { path } => {
                let Some((name, modules)) = path.split_last() else {
                    return;
                };
                if let Some(module) = self.resolve_module_mut(modules) {
                    module.stop_animate_on(name);
                }
            }
            Action::Reset { module_path, name } => {
                if let Some(module) = self.resolve_module_mut(&module_path) {
                    module.reset(name.as_deref(), current_time_ns);
                } else if module_path.is_empty() {
                    for module in self.modules.values_mut() {
                        module.reset(name.as_deref(), current_time_ns);
                    }
                }
            }
            Action::Send { protocol, port, message } => {
                self.send_module_message(protocol, Some(port), message, current_time_ns);
            }
            Action::SetTempo(tempo) => self.set_tempo(tempo, current_time_ns),
            Action::SetCycleLength(cycle_length) => self.set_cycle_length(cycle_length, current_time_ns),
            Action::StartCycle => self.start_cycle(current_time_ns),
            Action::SetRoute(name) => self.set_route(&name),
            Action::StartScene { name, body } => self.start_scene(name, body),
            Action::StopScene(pattern) => self.scenes.stop_matching(&pattern),
            Action::RestartScene(pattern) => {
                let shared = self.shared_time();
                self.scenes
                    .restart_matching(&pattern, shared, self.main_loop_lock.clone(), self.action_tx.clone());
            }
            Action::RequestRestart => self.restart_requested = true,
            Action::Fastforward { duration, mode } => self.fastforward(duration, mode),
            Action::SaveState { module_path, name } => {
                if let Err(err) = self.save_state(&module_path, &name) {
                    tracing::warn!(error = %err, module = ?module_path, snapshot = %name, "save_state failed");
                }
            }
            Action::LoadState {
                module_path,
                name,
                force_send,
            } => {
                if let Err(err) = self.load_state(&module_path, &name, force_send, current_time_ns) {
                    tracing::warn!(error = %err, module = ?module_path, snapshot = %name, "load_state failed");
                }
            }
        }
    }

    fn start_scene(&mut self, name: String, body: Arc<dyn Fn(SceneHandle) + Send + Sync>) {
        let shared = self.shared_time();
        self.scenes
            .start(name, shared, self.main_loop_lock.clone(), self.action_tx.clone(), body);
    }

    fn set_tempo(&mut self, tempo: f64, current_time_ns: u64) {
        let cycle_length = self.tempo_map.lock().unwrap().current().cycle_length;
        self.tempo_map.lock().unwrap().push(current_time_ns, tempo, cycle_length);
    }

    fn set_cycle_length(&mut self, cycle_length: f64, current_time_ns: u64) {
        let tempo = self.tempo_map.lock().unwrap().current().tempo;
        self.tempo_map.lock().unwrap().push(current_time_ns, tempo, cycle_length);
    }

    fn start_cycle(&mut self, current_time_ns: u64) {
        let current = self.tempo_map.lock().unwrap().current();
        self.tempo_map
            .lock()
            .unwrap()
            .reset(current_time_ns, current.tempo, current.cycle_length);
    }

    /// Advances virtual time by `duration` `mode`-units, divided into
    /// [crate::config::FASTFORWARD_SLICES] slices applied one per tick.
    /// Rejects a concurrent request while one is already active.
    fn fastforward(&mut self, duration: f64, mode: WaitMode) {
        if self.fastforward.is_some() {
            tracing::warn!("fastforward already in progress, ignoring request");
            return;
        }
        let tempo = self.tempo_map.lock().unwrap().current().tempo;
        let total_ns = match mode {
            WaitMode::Beats => crate::time::beats_to_ns(duration, tempo),
            WaitMode::Seconds => crate::time::seconds_to_ns(duration),
        };
        let slices = crate::config::FASTFORWARD_SLICES;
        self.fastforward = Some(Fastforward {
            remaining: slices,
            slice_ns: total_ns / slices as u64,
        });
    }

    // --- State snapshots (spec.md §6) --------------------------------------

    /// Saves `module_path`'s subtree to a named snapshot.
    pub fn save_state(&mut self, module_path: &[String], name: &str) -> anyhow::Result<()> {
        let Some(module) = self.resolve_module(module_path) else {
            anyhow::bail!("save_state: unknown module path {module_path:?}");
        };
        let entries = module.get_state(false);
        self.snapshot_store.save(module_path, name, &entries)
    }

    /// Restores `module_path`'s subtree from a named snapshot. A parse
    /// failure leaves the in-memory tree untouched.
    pub fn load_state(
        &mut self,
        module_path: &[String],
        name: &str,
        force_send: bool,
        current_time_ns: u64,
    ) -> anyhow::Result<()> {
        let entries = self.snapshot_store.load(module_path, name)?;
        let Some(module) = self.resolve_module_mut(module_path) else {
            anyhow::bail!("load_state: unknown module path {module_path:?}");
        };
        module.set_state(&entries, current_time_ns, force_send);
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        ENGINE_EXISTS.store(false, Ordering::SeqCst);
    }
}

fn collect_ports(module: &Module, out: &mut Vec<(Protocol, Port)>) {
    if module.protocol != Protocol::Nil {
        if let Some(port) = &module.port {
            out.push((module.protocol, port.clone()));
        }
    }
    for child in module.children() {
        collect_ports(child, out);
    }
}

fn has_port(module: &Module, protocol: Protocol, port: &Port) -> bool {
    if module.protocol == protocol && module.port.as_ref() == Some(port) {
        return true;
    }
    module.children().any(|child| has_port(child, protocol, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::Protocol;
    use crate::parameter::TimeMode;
    use crate::traits::{NoRestartWatcher, NoopRestarter, StateEntry};
    use crate::value::TypeTag;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct TestOsc {
        inbox: VecDeque<OscInbound>,
        outbox: Arc<StdMutex<Vec<OscOutbound>>>,
    }
    impl OscTransport for TestOsc {
        fn recv_timeout(&mut self, _timeout: Duration) -> Option<OscInbound> {
            self.inbox.pop_front()
        }
        fn send(&mut self, message: OscOutbound) -> anyhow::Result<()> {
            self.outbox.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestMidi {
        inbox: VecDeque<MidiEvent>,
        outbox: Vec<MidiEvent>,
    }
    impl MidiTransport for TestMidi {
        fn recv_timeout(&mut self, _timeout: Duration) -> Option<MidiEvent> {
            self.inbox.pop_front()
        }
        fn send(&mut self, event: MidiEvent) -> anyhow::Result<()> {
            self.outbox.push(event);
            Ok(())
        }
        fn drain(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestSnapshotStore {
        saved: StdMutex<HashMap<String, Vec<StateEntry>>>,
    }
    impl SnapshotStore for TestSnapshotStore {
        fn load(&self, module_path: &[String], name: &str) -> anyhow::Result<Vec<StateEntry>> {
            let key = format!("{module_path:?}/{name}");
            self.saved
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such snapshot"))
        }
        fn save(&self, module_path: &[String], name: &str, entries: &[StateEntry]) -> anyhow::Result<()> {
            let key = format!("{module_path:?}/{name}");
            self.saved.lock().unwrap().insert(key, entries.to_vec());
            Ok(())
        }
    }

    fn test_engine() -> (Engine, Arc<StdMutex<Vec<OscOutbound>>>) {
        let outbox = Arc::new(StdMutex::new(Vec::new()));
        let osc = TestOsc {
            inbox: VecDeque::new(),
            outbox: outbox.clone(),
        };
        let config = Config {
            engine_name: "e".to_string(),
            ..Config::default()
        };
        let engine = Engine::new(
            config,
            Box::new(osc),
            Box::new(TestMidi::default()),
            Box::new(TestSnapshotStore::default()),
            Box::new(NoopRestarter),
            Box::new(NoRestartWatcher),
            false,
        )
        .unwrap();
        (engine, outbox)
    }

    fn module_with_param(name: &str) -> Module {
        let mut m = Module::new(name, Protocol::Osc, Some(Port::Number(9000))).unwrap();
        m.add_parameter(
            "x",
            Some("/x".into()),
            vec![TypeTag::Double],
            vec![],
            vec![Value::Double(0.0)],
            0,
        )
        .unwrap();
        m
    }

    #[test]
    fn duplicate_engine_is_rejected() {
        let (engine, _) = test_engine();
        let second = Engine::new(
            Config::default(),
            Box::new(TestOsc::default()),
            Box::new(TestMidi::default()),
            Box::new(TestSnapshotStore::default()),
            Box::new(NoopRestarter),
            Box::new(NoRestartWatcher),
            false,
        );
        assert!(matches!(second, Err(EngineError::DuplicateEngine)));
        drop(engine);
        // Dropping releases the singleton slot for the next test run in this
        // process (tests in this module execute serially because they all
        // share the process-wide flag).
        let third = Engine::new(
            Config::default(),
            Box::new(TestOsc::default()),
            Box::new(TestMidi::default()),
            Box::new(TestSnapshotStore::default()),
            Box::new(NoopRestarter),
            Box::new(NoRestartWatcher),
            false,
        );
        assert!(third.is_ok());
    }

    #[test]
    fn set_with_no_change_emits_nothing_then_exactly_one_message() {
        let (mut engine, sink) = test_engine();
        engine.add_module(module_with_param("mod")).unwrap();

        engine.set_on_path(&["mod".into(), "x".into()], &[Value::Double(0.0)], 0, false, false);
        engine.tick();
        assert!(sink.lock().unwrap().is_empty());

        engine.set_on_path(&["mod".into(), "x".into()], &[Value::Double(0.5)], 1, false, false);
        engine.tick();
        let outbox = std::mem::take(&mut *sink.lock().unwrap());
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].message.address, "/x");
        assert_eq!(outbox[0].message.args, vec![Value::Double(0.5)]);
    }

    #[test]
    fn mapping_feedback_guard_fires_each_direction_once() {
        let (mut engine, sink) = test_engine();
        let mut module = Module::new("mod", Protocol::Osc, Some(Port::Number(9000))).unwrap();
        module
            .add_parameter("a", Some("/a".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        module
            .add_parameter("b", Some("/b".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        module.add_mapping(crate::mapping::Mapping::new(
            vec![vec!["a".into()]],
            vec![vec!["b".into()]],
            |values| {
                let Value::Int(v) = values[0] else { return vec![Value::Int(0)] };
                vec![Value::Int(v + 1)]
            },
        ));
        module.add_mapping(crate::mapping::Mapping::new(
            vec![vec!["b".into()]],
            vec![vec!["a".into()]],
            |values| {
                let Value::Int(v) = values[0] else { return vec![Value::Int(0)] };
                vec![Value::Int(v - 1)]
            },
        ));
        engine.add_module(module).unwrap();

        engine.set_on_path(&["mod".into(), "a".into()], &[Value::Int(5)], 0, false, false);
        engine.tick();
        let outbox = std::mem::take(&mut *sink.lock().unwrap());
        let mut by_addr: HashMap<&str, &Value> = HashMap::new();
        for m in &outbox {
            by_addr.insert(m.message.address.as_str(), &m.message.args[0]);
        }
        assert_eq!(by_addr.get("/a"), Some(&&Value::Int(5)));
        assert_eq!(by_addr.get("/b"), Some(&&Value::Int(6)));
    }

    #[test]
    fn non_convergent_mapping_pair_fires_each_edge_at_most_once_per_tick() {
        // `a -> b: b = a + 1` and `b -> a: a = b + 1` never reach a fixpoint:
        // every write re-dirties the other side's source. Without a genuine
        // fired-this-tick latch (one that outlives the single `transform`
        // call) this re-fires each mapping forever within one tick instead
        // of terminating after each edge's one allowed shot.
        let (mut engine, _sink) = test_engine();
        let mut module = Module::new("mod", Protocol::Osc, Some(Port::Number(9000))).unwrap();
        module
            .add_parameter("a", Some("/a".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        module
            .add_parameter("b", Some("/b".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        let a_to_b_calls = Arc::new(StdMutex::new(0u32));
        let b_to_a_calls = Arc::new(StdMutex::new(0u32));
        {
            let calls = a_to_b_calls.clone();
            module.add_mapping(crate::mapping::Mapping::new(
                vec![vec!["a".into()]],
                vec![vec!["b".into()]],
                move |values| {
                    *calls.lock().unwrap() += 1;
                    let Value::Int(v) = values[0] else { return vec![Value::Int(0)] };
                    vec![Value::Int(v + 1)]
                },
            ));
        }
        {
            let calls = b_to_a_calls.clone();
            module.add_mapping(crate::mapping::Mapping::new(
                vec![vec!["b".into()]],
                vec![vec!["a".into()]],
                move |values| {
                    *calls.lock().unwrap() += 1;
                    let Value::Int(v) = values[0] else { return vec![Value::Int(0)] };
                    vec![Value::Int(v + 1)]
                },
            ));
        }
        engine.add_module(module).unwrap();

        engine.set_on_path(&["mod".into(), "a".into()], &[Value::Int(5)], 0, false, false);
        engine.tick();

        // Each mapping's transform ran exactly once this tick: the latch
        // blocked the second, third, ... re-dirty of its source, so the
        // drain terminated instead of looping forever.
        assert_eq!(*a_to_b_calls.lock().unwrap(), 1);
        assert_eq!(*b_to_a_calls.lock().unwrap(), 1);
        assert_eq!(
            engine.resolve_module(&["mod".into()]).unwrap().get("a"),
            Some([Value::Int(7)].as_slice())
        );
        assert_eq!(
            engine.resolve_module(&["mod".into()]).unwrap().get("b"),
            Some([Value::Int(6)].as_slice())
        );

        // The next tick starts with both latches released: a further change
        // propagates through both mappings again, exactly once each.
        engine.set_on_path(&["mod".into(), "a".into()], &[Value::Int(100)], 1, false, false);
        engine.tick();
        assert_eq!(*a_to_b_calls.lock().unwrap(), 2);
        assert_eq!(*b_to_a_calls.lock().unwrap(), 2);
    }

    #[test]
    fn generic_control_api_resolves_address_into_the_tree() {
        let (mut engine, _sink) = test_engine();
        engine.add_module(module_with_param("mod")).unwrap();
        let message = OscMessage::new("/e/mod/x", vec![Value::Double(0.7)]);
        let resolved = engine.try_generic_control_api(&message, 0);
        assert!(resolved);
        assert_eq!(
            engine.resolve_module(&["mod".into()]).unwrap().get("x"),
            Some([Value::Double(0.7)].as_slice())
        );
    }

    #[test]
    fn snapshot_round_trips_through_the_engine() {
        let (mut engine, _sink) = test_engine();
        engine.add_module(module_with_param("mod")).unwrap();
        engine.set_on_path(&["mod".into(), "x".into()], &[Value::Double(0.42)], 0, false, false);

        engine.save_state(&["mod".into()], "snap").unwrap();
        engine.set_on_path(&["mod".into(), "x".into()], &[Value::Double(0.0)], 1, false, false);
        engine.load_state(&["mod".into()], "snap", false, 2).unwrap();

        assert_eq!(
            engine.resolve_module(&["mod".into()]).unwrap().get("x"),
            Some([Value::Double(0.42)].as_slice())
        );
    }

    #[test]
    fn animation_completes_with_monotonically_increasing_values() {
        let (mut engine, _sink) = test_engine();
        engine.add_module(module_with_param("mod")).unwrap();
        let action = Action::Animate {
            path: vec!["mod".into(), "x".into()],
            start: Some(vec![0.0]),
            end: vec![1.0],
            duration: 1.0,
            mode: TimeMode::Seconds,
            tempo: 120.0,
            easing_name: "linear".to_string(),
            easing_mode: crate::easing::Mode::In,
            loop_: false,
        };
        engine.apply_action(action, 0);

        let mut last = -1.0;
        for t_ns in [0u64, 250_000_000, 500_000_000, 750_000_000, 1_000_000_000] {
            let module = engine.resolve_module_mut(&["mod".into()]).unwrap();
            module.advance_animations(t_ns, &mut Rng::default(), &mut VecDeque::new());
            let v = module.get("x").unwrap()[0].as_f64().unwrap();
            assert!(v >= last);
            last = v;
        }
        assert_eq!(last, 1.0);
    }
}
