// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The hierarchical parameter namespace: a [Module] owns parameters,
//! meta-parameters, mappings, and submodules, and resolves addresses/paths
//! down into them.
//!
//! Submodules are owned directly by their parent rather than through a
//! back-pointer a child checks against its parent at attach time. That
//! makes a parent/child mismatch structurally unrepresentable: a module
//! can't end up under two parents, or under a parent other than the one
//! that now owns it, because there's no second pointer that could
//! disagree with the first.

use crate::easing::Mode as EasingMode;
use crate::error::EngineError;
use crate::events::{self, Callback, EventEmitter};
use crate::mapping::{self, Mapping, MetaParameter, ParamPath};
use crate::osc::{Port, Protocol};
use crate::parameter::{Parameter, TimeMode};
use crate::rng::Rng;
use crate::traits::StateEntry;
use crate::value::{TypeTag, Value};
use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;

/// A user-supplied hook invoked on every message the module receives before
/// the generic control API or active route get a chance.
/// Returning [ControlFlow::Break] vetoes all downstream processing for that
/// message.
pub type RouteHook = Box<dyn FnMut(&mut Module, &[Value]) -> ControlFlow<()> + Send>;

/// A module-level operation invocable through the generic control API by
/// name, alongside plain parameter assignment.
pub type PublicMethod = Box<dyn FnMut(&mut Module, &[Value]) + Send>;

/// A node in the tree rooted at the engine.
pub struct Module {
    /// Name, unique among its siblings.
    pub name: String,
    /// Transport protocol; inherited from the parent at `add_submodule`
    /// time if left unset.
    pub protocol: Protocol,
    /// Port/socket/URL; inherited from the parent at `add_submodule` time
    /// if left unset (except for `midi`, whose port is always the module's
    /// own name, not inherited from a parent).
    pub port: Option<Port>,
    /// Full path from the engine's top-level module map down to this
    /// module (inclusive of `name`).
    pub path: Vec<String>,
    parameters: HashMap<String, Parameter>,
    meta_parameters: HashMap<String, MetaParameter>,
    mappings: Vec<Mapping>,
    mappings_sorted: bool,
    animating: Vec<String>,
    children: HashMap<String, Module>,
    aliases: HashMap<String, String>,
    /// This module's event callback table.
    pub events: EventEmitter,
    route_hook: Option<RouteHook>,
    methods: HashMap<String, PublicMethod>,
}

impl Module {
    /// Creates a top-level or detached module. `path` is filled in by
    /// [Module::add_submodule] when it's attached; a module never
    /// constructed as a submodule keeps `path == [name]`.
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        port: Option<Port>,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if name.contains('*') || name.contains('[') {
            return Err(EngineError::ForbiddenName(name));
        }
        Ok(Self {
            path: vec![name.clone()],
            name,
            protocol,
            port,
            parameters: HashMap::new(),
            meta_parameters: HashMap::new(),
            mappings: Vec::new(),
            mappings_sorted: true,
            animating: Vec::new(),
            children: HashMap::new(),
            aliases: HashMap::new(),
            events: EventEmitter::new(),
            route_hook: None,
            methods: HashMap::new(),
        })
    }

    /// Registers a named operation callable through the generic control API
    /// when the address's final segment doesn't name a parameter.
    pub fn add_public_method(&mut self, name: impl Into<String>, method: PublicMethod) {
        self.methods.insert(name.into(), method);
    }

    /// Invokes a registered public method by name, if one exists.
    pub fn run_public_method(&mut self, name: &str, args: &[Value]) -> bool {
        let Some(mut method) = self.methods.remove(name) else {
            return false;
        };
        method(self, args);
        self.methods.insert(name.to_string(), method);
        true
    }

    /// Installs this module's `route` hook.
    pub fn set_route_hook(&mut self, hook: RouteHook) {
        self.route_hook = Some(hook);
    }

    /// Runs the module's `route` hook, if any.
    pub fn run_route_hook(&mut self, args: &[Value]) -> ControlFlow<()> {
        match self.route_hook.take() {
            Some(mut hook) => {
                let result = hook(self, args);
                self.route_hook = Some(hook);
                result
            }
            None => ControlFlow::Continue(()),
        }
    }

    /// Attaches `child` as a submodule, inheriting protocol/port when
    /// unset. Fails if a sibling already has this name (configuration-fatal:
    /// duplicate module names are a setup bug, not a runtime condition).
    pub fn add_submodule(&mut self, mut child: Module) -> Result<(), EngineError> {
        if self.children.contains_key(&child.name) {
            return Err(EngineError::DuplicateModule(child.name));
        }
        if child.protocol == Protocol::Nil {
            child.protocol = self.protocol;
        }
        if child.protocol == Protocol::Midi {
            child.port = Some(Port::Socket(child.name.clone()));
        } else if child.port.is_none() {
            child.port = self.port.clone();
        }
        child.path = self.path.iter().cloned().chain([child.name.clone()]).collect();
        self.children.insert(child.name.clone(), child);
        Ok(())
    }

    /// Registers `alias -> child_name` pairs usable anywhere a submodule
    /// name is accepted.
    pub fn set_aliases(&mut self, aliases: HashMap<String, String>) {
        self.aliases = aliases;
    }

    fn resolve_child_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Looks up an immediate child, following aliases.
    pub fn child(&self, name: &str) -> Option<&Module> {
        self.children.get(self.resolve_child_name(name))
    }

    /// Looks up an immediate child mutably, following aliases.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Module> {
        let resolved = self.resolve_child_name(name).to_string();
        self.children.get_mut(&resolved)
    }

    /// All immediate children.
    pub fn children(&self) -> impl Iterator<Item = &Module> {
        self.children.values()
    }

    /// All immediate children, mutably.
    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        self.children.values_mut()
    }

    /// Walks `path` (a sequence of submodule names ending in nothing,
    /// i.e. purely module segments) down from this module.
    pub fn resolve_module(&self, path: &[String]) -> Option<&Module> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self.child(head)?.resolve_module(rest),
        }
    }

    /// Mutable counterpart to [Module::resolve_module].
    pub fn resolve_module_mut(&mut self, path: &[String]) -> Option<&mut Module> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self.child_mut(head)?.resolve_module_mut(rest),
        }
    }

    /// Adds a parameter, assigning `default` immediately (which may mark it
    /// dirty). Fails if the name is already taken by a parameter
    /// or meta-parameter.
    #[allow(clippy::too_many_arguments)]
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        address: Option<String>,
        types: Vec<TypeTag>,
        static_values: Vec<Value>,
        default: Vec<Value>,
        current_time_ns: u64,
    ) -> anyhow::Result<()> {
        let name = name.into();
        if self.parameters.contains_key(&name) {
            anyhow::bail!("parameter '{name}' already exists on module '{}'", self.name);
        }
        let param = Parameter::new(name.clone(), address, types, static_values, default, current_time_ns);
        self.parameters.insert(name.clone(), param);
        self.notify_parameter_added(&name);
        Ok(())
    }

    /// Removes a parameter (and any meta-parameter/animation bookkeeping
    /// for it). `"*"` removes every parameter.
    pub fn remove_parameter(&mut self, name: &str) {
        if name == "*" {
            let names: Vec<String> = self.parameters.keys().cloned().collect();
            for n in names {
                self.remove_parameter(&n);
            }
            return;
        }
        self.parameters.remove(name);
        self.meta_parameters.remove(name);
        self.animating.retain(|n| n != name);
    }

    /// Whether this module owns a parameter (including meta-parameters) by
    /// this name.
    pub fn has(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// The current dynamic values of a locally-owned parameter.
    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.parameters.get(name).map(Parameter::get)
    }

    /// Resolves `path` (submodule names, then a final parameter name) and
    /// returns that parameter's current values.
    pub fn get_on_path(&self, path: &[String]) -> Option<&[Value]> {
        let (name, modules) = path.split_last()?;
        self.resolve_module(modules)?.get(name)
    }

    /// Mutable access to a locally-owned parameter.
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.get_mut(name)
    }

    /// Finds the full path of the module whose `(protocol, port)` matches,
    /// searching this module's subtree depth-first. Used to resolve an
    /// inbound message's destination module before routing it.
    pub fn find_by_port(&self, protocol: Protocol, port_key: &str) -> Option<Vec<String>> {
        if self.protocol == protocol && self.port.as_ref().map(Port::to_string).as_deref() == Some(port_key) {
            return Some(self.path.clone());
        }
        for child in self.children.values() {
            if let Some(path) = child.find_by_port(protocol, port_key) {
                return Some(path);
            }
        }
        None
    }

    /// Walks every locally-owned and descendant parameter currently flagged
    /// dirty (value changed, or a forced send pending), pushing
    /// `(full_path, parameter_name)` pairs onto `out`. Called once at the
    /// start of a tick's dirty-parameter drain to seed the work queue.
    pub fn collect_dirty(&self, out: &mut VecDeque<(Vec<String>, String)>) {
        let mut names: Vec<&String> = self.parameters.keys().collect();
        names.sort();
        for name in names {
            if self.parameters[name].dirty {
                out.push_back((self.path.clone(), name.clone()));
            }
        }
        let mut child_names: Vec<&String> = self.children.keys().collect();
        child_names.sort();
        for name in child_names {
            self.children[name].collect_dirty(out);
        }
    }

    /// Runs [Module::propagate] at every level from this module down to the
    /// parameter that changed, so a mapping registered on any ancestor of
    /// the changed parameter (not just its immediate owner) gets a chance
    /// to fire. `relative_path` is the changed parameter's full path
    /// relative to `self`.
    pub fn propagate_chain(
        &mut self,
        relative_path: &[String],
        current_time_ns: u64,
        out: &mut VecDeque<(Vec<String>, String)>,
    ) {
        self.propagate(relative_path, current_time_ns, out);
        if let Some((head, rest)) = relative_path.split_first() {
            if let Some(child) = self.children.get_mut(head) {
                child.propagate_chain(rest, current_time_ns, out);
            }
        }
    }

    /// Sets a locally-owned parameter or, if `name` names a meta-parameter,
    /// runs its setter instead (a user setter that
    /// decomposes a value assignment into source-parameter writes").
    /// Returns whether the parameter ended up dirty.
    pub fn set_on(
        &mut self,
        name: &str,
        args: &[Value],
        current_time_ns: u64,
        force_send: bool,
        preserve_animation: bool,
    ) -> bool {
        if self.meta_parameters.contains_key(name) {
            return self.set_meta_parameter(name, args, current_time_ns);
        }
        let Some(param) = self.parameters.get_mut(name) else {
            tracing::warn!(module = %self.name, parameter = name, "set: parameter not found");
            return false;
        };
        if param.is_animating() && !preserve_animation {
            param.stop_animation();
        }
        let changed = param.set(args, current_time_ns, true);
        if force_send {
            param.force_send(current_time_ns);
        }
        changed
    }

    /// Resolves `path` (submodule names, then a final parameter name) and
    /// sets that parameter.
    pub fn set_on_path(
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
            tracing::warn!(path = ?path, "set_on_path: submodule not found");
            return false;
        };
        module.set_on(name, args, current_time_ns, force_send, preserve_animation)
    }

    /// Resets one parameter (or, if `name` is `None`, every parameter
    /// including submodules') to its default value.
    pub fn reset(&mut self, name: Option<&str>, current_time_ns: u64) {
        match name {
            None => {
                for child in self.children.values_mut() {
                    child.reset(None, current_time_ns);
                }
                let names: Vec<String> = self.parameters.keys().cloned().collect();
                for n in names {
                    self.reset(Some(&n), current_time_ns);
                }
            }
            Some(name) => {
                if let Some(param) = self.parameters.get(name) {
                    if !param.default.is_empty() {
                        let default = param.default.clone();
                        self.set_on(name, &default, current_time_ns, false, false);
                    }
                }
            }
        }
    }

    /// Starts (or restarts) an animation on a locally-owned parameter
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn animate_on(
        &mut self,
        name: &str,
        start: Option<Vec<f64>>,
        end: Vec<f64>,
        duration: f64,
        mode: TimeMode,
        tempo: f64,
        easing_name: &str,
        easing_mode: EasingMode,
        loop_: bool,
        current_time_ns: u64,
    ) {
        let Some(param) = self.parameters.get_mut(name) else {
            tracing::warn!(module = %self.name, parameter = name, "animate: parameter not found");
            return;
        };
        param.animate(
            start,
            end,
            duration,
            mode,
            tempo,
            easing_name,
            easing_mode,
            loop_,
            current_time_ns,
        );
        if param.is_animating() && !self.animating.iter().any(|n| n == name) {
            self.animating.push(name.to_string());
        }
    }

    /// Stops an animation on a locally-owned parameter.
    pub fn stop_animate_on(&mut self, name: &str) {
        if let Some(param) = self.parameters.get_mut(name) {
            param.stop_animation();
        }
        self.animating.retain(|n| n != name);
    }

    /// Advances every running animation (recursing into children), pushing
    /// `(full_path, parameter_name)` for each parameter that became dirty
    /// onto `out`, for the dirty-parameter drain to process.
    pub fn advance_animations(
        &mut self,
        current_time_ns: u64,
        rng: &mut Rng,
        out: &mut VecDeque<(Vec<String>, String)>,
    ) {
        for child in self.children.values_mut() {
            child.advance_animations(current_time_ns, rng, out);
        }
        let mut finished = Vec::new();
        for name in &self.animating {
            let Some(param) = self.parameters.get_mut(name) else {
                finished.push(name.clone());
                continue;
            };
            if param.update_animation(current_time_ns, rng) {
                out.push_back((self.path.clone(), name.clone()));
            }
            if !param.is_animating() {
                finished.push(name.clone());
            }
        }
        self.animating.retain(|n| !finished.contains(n));
    }

    /// Registers a mapping. Source/destination paths are resolved relative
    /// to this module's own subtree. The mapping list is
    /// re-sorted by the dependency comparator lazily, the next time a
    /// dirty event needs to walk it.
    pub fn add_mapping(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
        self.mappings_sorted = false;
    }

    /// Registers a meta-parameter, computing its initial value immediately
    /// only if every source already exists.
    pub fn add_meta_parameter(
        &mut self,
        name: impl Into<String>,
        meta: MetaParameter,
        types: Vec<TypeTag>,
        address: Option<String>,
        current_time_ns: u64,
    ) -> anyhow::Result<()> {
        let name = name.into();
        if self.parameters.contains_key(&name) {
            anyhow::bail!("parameter '{name}' already exists on module '{}'", self.name);
        }
        let all_sources_exist = meta.sources.iter().all(|p| self.get_on_path(p).is_some());
        self.parameters.insert(
            name.clone(),
            Parameter::new(name.clone(), address, types, vec![], vec![], current_time_ns),
        );
        self.meta_parameters.insert(name.clone(), meta);
        if all_sources_exist {
            self.update_meta_parameter(&name, current_time_ns);
        }
        Ok(())
    }

    /// Adds a meta-parameter that simply mirrors another parameter,
    /// possibly owned by a submodule.
    pub fn add_alias_parameter(
        &mut self,
        name: impl Into<String>,
        target: ParamPath,
        types: Vec<TypeTag>,
        current_time_ns: u64,
    ) -> anyhow::Result<()> {
        let meta = MetaParameter::new(vec![target], |values| values.to_vec(), |values| vec![values.to_vec()]);
        self.add_meta_parameter(name, meta, types, None, current_time_ns)
    }

    fn update_meta_parameter(&mut self, name: &str, current_time_ns: u64) -> bool {
        let Some(meta) = self.meta_parameters.get(name) else {
            return false;
        };
        let mut values = Vec::new();
        for source in &meta.sources {
            match self.get_on_path(source) {
                Some(v) => values.extend_from_slice(v),
                None => return false,
            }
        }
        let new_values = (meta.getter)(&values);
        let Some(param) = self.parameters.get_mut(name) else {
            return false;
        };
        param.set(&new_values, current_time_ns, true)
    }

    fn set_meta_parameter(&mut self, name: &str, args: &[Value], current_time_ns: u64) -> bool {
        let Some(writes) = (|| {
            let meta = self.meta_parameters.get(name)?;
            meta.guarded(|| (meta.setter)(args))
        })() else {
            return false;
        };
        let Some(meta) = self.meta_parameters.get(name) else {
            return false;
        };
        let sources = meta.sources.clone();
        let mut any_changed = false;
        for (path, values) in sources.iter().zip(writes.iter()) {
            if self.set_on_path(path, values, current_time_ns, false, false) {
                any_changed = true;
            }
        }
        any_changed
    }

    /// Called after a parameter somewhere in this subtree changed, with its
    /// path relative to *this* module. Re-evaluates every
    /// local mapping/meta-parameter whose sources include that path,
    /// applying the dependency-sorted order, and returns the
    /// `(full_path, parameter_name)` of every destination parameter that
    /// became dirty as a result.
    pub fn propagate(
        &mut self,
        changed_relative_path: &[String],
        current_time_ns: u64,
        out: &mut VecDeque<(Vec<String>, String)>,
    ) {
        if !self.mappings_sorted {
            mapping::sort_by_dependency(&mut self.mappings);
            self.mappings_sorted = true;
        }

        for name in self.meta_parameters.keys().cloned().collect::<Vec<_>>() {
            let depends = self.meta_parameters[&name].depends_on(changed_relative_path);
            if depends && self.update_meta_parameter(&name, current_time_ns) {
                out.push_back((self.path.clone(), name));
            }
        }

        for i in 0..self.mappings.len() {
            if !self.mappings[i].depends_on(changed_relative_path) {
                continue;
            }
            self.fire_mapping(i, current_time_ns, out);
        }
    }

    fn fire_mapping(&mut self, index: usize, current_time_ns: u64, out: &mut VecDeque<(Vec<String>, String)>) {
        let condition_ok = match &self.mappings[index].condition {
            None => true,
            Some(path) => {
                let value = self.get_on_path(path).and_then(|v| v.first());
                mapping::Mapping::condition_allows(value)
            }
        };
        if !condition_ok {
            return;
        }
        if !self.mappings[index].try_fire() {
            return;
        }
        let sources: Vec<Value> = {
            let sources = self.mappings[index].sources.clone();
            let mut values = Vec::new();
            for source in &sources {
                match self.get_on_path(source) {
                    Some(v) => values.extend_from_slice(v),
                    None => return,
                }
            }
            values
        };
        let outputs = (self.mappings[index].transform)(&sources);
        let destinations = self.mappings[index].destinations.clone();
        for (path, value) in destinations.iter().zip(outputs.iter()) {
            if self.set_on_path(path, std::slice::from_ref(value), current_time_ns, false, false) {
                if let Some((name, modules)) = path.split_last() {
                    if let Some(module) = self.resolve_module(modules) {
                        out.push_back((module.path.clone(), name.clone()));
                    }
                }
            }
        }
    }

    /// Releases every local and descendant mapping's fired-this-tick latch.
    /// Called once, at the end of a tick's dirty-parameter drain, so the
    /// next tick's propagation starts with every edge eligible to fire
    /// again.
    pub fn reset_mapping_latches(&self) {
        for mapping in &self.mappings {
            mapping.reset_latch();
        }
        for child in self.children.values() {
            child.reset_mapping_latches();
        }
    }

    /// Binds an event callback.
    pub fn on_event(&mut self, event: impl Into<String>, callback: Callback) {
        self.events.on(event, callback);
    }

    /// Dispatches `event_name` locally (no bubbling — the caller, which has
    /// the full ancestor chain, drives bubbling via
    /// [events::dispatch_bubbling]).
    pub fn dispatch_local(&self, event_name: &str, args: &[Value]) -> ControlFlow<()> {
        self.events.dispatch_local(event_name, args)
    }

    /// Snapshots this module's (and its submodules') parameters
    /// `omit_defaults` skips parameters whose current
    /// value equals their default.
    pub fn get_state(&self, omit_defaults: bool) -> Vec<StateEntry> {
        let mut entries = Vec::new();
        let mut names: Vec<&String> = self.parameters.keys().collect();
        names.sort();
        for name in names {
            let param = &self.parameters[name];
            if omit_defaults && param.get() == param.default.as_slice() {
                continue;
            }
            entries.push(StateEntry {
                path: vec![name.clone()],
                values: param.get().to_vec(),
            });
        }
        let mut child_names: Vec<&String> = self.children.keys().collect();
        child_names.sort();
        for child_name in child_names {
            let child = &self.children[child_name];
            for mut entry in child.get_state(omit_defaults) {
                entry.path.insert(0, child_name.clone());
                entries.push(entry);
            }
        }
        entries
    }

    /// Restores parameters from a snapshot. Unknown paths
    /// are logged and skipped rather than treated as fatal — a snapshot
    /// taken by a newer version of a module shouldn't crash an older one.
    pub fn set_state(&mut self, entries: &[StateEntry], current_time_ns: u64, force_send: bool) {
        for entry in entries {
            if !self.set_on_path(&entry.path, &entry.values, current_time_ns, force_send, false)
                && self.get_on_path(&entry.path).is_none()
            {
                tracing::warn!(path = ?entry.path, "set_state: unknown parameter path, skipped");
            }
        }
    }

    /// Dispatches the standard `parameter_added` event for a just-added
    /// parameter. Modules don't hold a parent pointer, so — like
    /// `module_added`'s dispatch in [crate::engine::Engine::add_module] —
    /// this only reaches this module's own listeners; a caller that already
    /// has the root-to-leaf chain can bubble further with
    /// [events::dispatch_bubbling].
    pub fn notify_parameter_added(&self, name: &str) {
        tracing::debug!(module = %self.name, parameter = name, "parameter added");
        self.events
            .dispatch_local(events::names::PARAMETER_ADDED, &[Value::String(name.to_string())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(name: &str) -> Module {
        Module::new(name, Protocol::Osc, Some(Port::Number(9000))).unwrap()
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        assert!(matches!(
            Module::new("bad*name", Protocol::Osc, None),
            Err(EngineError::ForbiddenName(_))
        ));
        assert!(matches!(
            Module::new("bad[name", Protocol::Osc, None),
            Err(EngineError::ForbiddenName(_))
        ));
    }

    #[test]
    fn submodule_inherits_parent_protocol_and_port() {
        let mut parent = m("parent");
        let child = Module::new("child", Protocol::Nil, None).unwrap();
        parent.add_submodule(child).unwrap();
        let child = parent.child("child").unwrap();
        assert_eq!(child.protocol, Protocol::Osc);
        assert_eq!(child.port, Some(Port::Number(9000)));
        assert_eq!(child.path, vec!["parent".to_string(), "child".to_string()]);
    }

    #[test]
    fn duplicate_submodule_name_is_rejected() {
        let mut parent = m("parent");
        parent.add_submodule(m("child")).unwrap();
        assert!(matches!(
            parent.add_submodule(m("child")),
            Err(EngineError::DuplicateModule(_))
        ));
    }

    #[test]
    fn set_with_no_change_does_not_report_dirty() {
        let mut module = m("mod");
        module
            .add_parameter("x", Some("/x".into()), vec![TypeTag::Double], vec![], vec![Value::Double(0.0)], 0)
            .unwrap();
        assert!(!module.set_on("x", &[Value::Double(0.0)], 1, false, false));
        assert!(module.set_on("x", &[Value::Double(0.5)], 2, false, false));
    }

    #[test]
    fn add_parameter_dispatches_parameter_added() {
        let mut module = m("mod");
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = seen.clone();
        module.on_event(
            events::names::PARAMETER_ADDED,
            Box::new(move |args| {
                if let Some(Value::String(name)) = args.first() {
                    recorded.lock().unwrap().push(name.clone());
                }
                ControlFlow::Continue(())
            }),
        );
        module
            .add_parameter("x", Some("/x".into()), vec![TypeTag::Double], vec![], vec![Value::Double(0.0)], 0)
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn mapping_propagates_a_to_b() {
        let mut module = m("mod");
        module
            .add_parameter("a", Some("/a".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        module
            .add_parameter("b", Some("/b".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        module.add_mapping(Mapping::new(
            vec![vec!["a".into()]],
            vec![vec!["b".into()]],
            |values| {
                let Value::Int(v) = values[0] else { return vec![Value::Int(0)] };
                vec![Value::Int(v + 1)]
            },
        ));

        module.set_on("a", &[Value::Int(5)], 1, false, false);
        let mut out = VecDeque::new();
        module.propagate(&["a".to_string()], 1, &mut out);
        assert_eq!(module.get("b"), Some([Value::Int(6)].as_slice()));
    }

    #[test]
    fn state_round_trips() {
        let mut module = m("mod");
        module
            .add_parameter("a", Some("/a".into()), vec![TypeTag::Int], vec![], vec![Value::Int(1)], 0)
            .unwrap();
        let mut sub = Module::new("sub", Protocol::Nil, None).unwrap();
        sub.add_parameter(
            "c",
            Some("/c".into()),
            vec![TypeTag::Double, TypeTag::Double],
            vec![],
            vec![Value::Double(0.1), Value::Double(0.2)],
            0,
        )
        .unwrap();
        module.add_submodule(sub).unwrap();

        let snapshot = module.get_state(false);
        let mut fresh = m("mod");
        fresh
            .add_parameter("a", Some("/a".into()), vec![TypeTag::Int], vec![], vec![Value::Int(0)], 0)
            .unwrap();
        let mut fresh_sub = Module::new("sub", Protocol::Nil, None).unwrap();
        fresh_sub
            .add_parameter(
                "c",
                Some("/c".into()),
                vec![TypeTag::Double, TypeTag::Double],
                vec![],
                vec![Value::Double(0.0), Value::Double(0.0)],
                0,
            )
            .unwrap();
        fresh.add_submodule(fresh_sub).unwrap();
        fresh.set_state(&snapshot, 0, false);

        assert_eq!(fresh.get("a"), Some([Value::Int(1)].as_slice()));
        assert_eq!(
            fresh.child("sub").unwrap().get("c"),
            Some([Value::Double(0.1), Value::Double(0.2)].as_slice())
        );
    }
}
