// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The active-route abstraction: a named object the engine dispatches
//! unconsumed messages to, with `activate`/`deactivate` lifecycle hooks
//! mirroring a module's `route` hook but scoped engine-wide rather than
//! per-module.

use crate::value::Value;

/// A routing policy the engine dispatches unclaimed inbound messages to.
/// Exactly one route is active at a time; switching routes calls
/// [Route::deactivate] on the outgoing one and [Route::activate] on the
/// incoming one.
pub trait Route: Send {
    /// This route's name, used for lookup and in `route_changed` events.
    fn name(&self) -> &str;

    /// Called when this route becomes the active one.
    fn activate(&mut self) {}

    /// Called when this route stops being the active one.
    fn deactivate(&mut self) {}

    /// Handles a message the engine's per-module routing didn't consume.
    /// `protocol`/`port` identify the module (or raw
    /// source) the message arrived from or on.
    fn route(&mut self, protocol: &str, port: &str, address: &str, args: &[Value]);
}

/// The engine's route registry: a name-keyed table plus the currently
/// active selection.
#[derive(Default)]
pub struct RouteTable {
    routes: std::collections::HashMap<String, Box<dyn Route>>,
    active: Option<String>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route by its own `name()`.
    pub fn add(&mut self, route: Box<dyn Route>) {
        self.routes.insert(route.name().to_string(), route);
    }

    /// Switches the active route, deactivating the previous one first.
    /// Logs and does nothing if `name` isn't registered.
    pub fn set_active(&mut self, name: &str) -> bool {
        if !self.routes.contains_key(name) {
            tracing::warn!(route = name, "set_route: route not found");
            return false;
        }
        if let Some(prev) = self.active.take() {
            if let Some(route) = self.routes.get_mut(&prev) {
                route.deactivate();
            }
        }
        if let Some(route) = self.routes.get_mut(name) {
            route.activate();
        }
        self.active = Some(name.to_string());
        true
    }

    /// The name of the active route, if any.
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Dispatches to the active route, if one is set.
    pub fn dispatch(&mut self, protocol: &str, port: &str, address: &str, args: &[Value]) {
        if let Some(name) = &self.active {
            if let Some(route) = self.routes.get_mut(name) {
                route.route(protocol, port, address, args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRoute {
        name: String,
        activations: Arc<AtomicUsize>,
        dispatches: Arc<AtomicUsize>,
    }
    impl Route for CountingRoute {
        fn name(&self) -> &str {
            &self.name
        }
        fn activate(&mut self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }
        fn route(&mut self, _protocol: &str, _port: &str, _address: &str, _args: &[Value]) {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn switching_routes_deactivates_the_previous_one() {
        let mut table = RouteTable::new();
        let a_activations = Arc::new(AtomicUsize::new(0));
        let b_activations = Arc::new(AtomicUsize::new(0));
        table.add(Box::new(CountingRoute {
            name: "a".into(),
            activations: a_activations.clone(),
            dispatches: Arc::new(AtomicUsize::new(0)),
        }));
        table.add(Box::new(CountingRoute {
            name: "b".into(),
            activations: b_activations.clone(),
            dispatches: Arc::new(AtomicUsize::new(0)),
        }));

        assert!(table.set_active("a"));
        assert_eq!(a_activations.load(Ordering::SeqCst), 1);
        assert!(table.set_active("b"));
        assert_eq!(b_activations.load(Ordering::SeqCst), 1);
        assert_eq!(table.active_name(), Some("b"));
    }

    #[test]
    fn unknown_route_name_is_rejected() {
        let mut table = RouteTable::new();
        assert!(!table.set_active("missing"));
    }

    #[test]
    fn dispatch_only_reaches_the_active_route() {
        let mut table = RouteTable::new();
        let dispatches = Arc::new(AtomicUsize::new(0));
        table.add(Box::new(CountingRoute {
            name: "a".into(),
            activations: Arc::new(AtomicUsize::new(0)),
            dispatches: dispatches.clone(),
        }));
        table.dispatch("osc", "mod", "/x", &[]);
        assert_eq!(dispatches.load(Ordering::SeqCst), 0);
        table.set_active("a");
        table.dispatch("osc", "mod", "/x", &[]);
        assert_eq!(dispatches.load(Ordering::SeqCst), 1);
    }
}
