// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Bubbling event emission with cancellation: a per-object callback
//! table, a dispatch that invokes every bound callback, and bubbling up
//! to parent modules and ultimately the engine unless a callback signals
//! suppression.
//!
//! Modules don't hold a parent pointer, so bubbling here is driven by the
//! caller, which already has the root-to-leaf chain from walking the
//! module tree: see [dispatch_bubbling].

use crate::value::Value;
use std::collections::HashMap;
use std::ops::ControlFlow;

/// A bound event callback. Returning [ControlFlow::Break] suppresses further
/// bubbling past this emitter.
pub type Callback = Box<dyn Fn(&[Value]) -> ControlFlow<()> + Send + Sync>;

/// Standard event names dispatched by the engine and module tree.
pub mod names {
    /// The engine has started its main loop.
    pub const STARTED: &str = "started";
    /// The engine is about to stop.
    pub const STOPPING: &str = "stopping";
    /// The engine has stopped.
    pub const STOPPED: &str = "stopped";
    /// A restart has been requested and teardown is beginning.
    pub const RESTARTING: &str = "restarting";
    /// A route was installed on a module.
    pub const ROUTE_ADDED: &str = "route_added";
    /// The active route changed.
    pub const ROUTE_CHANGED: &str = "route_changed";
    /// A module was added to the tree.
    pub const MODULE_ADDED: &str = "module_added";
    /// A parameter was added to a module.
    pub const PARAMETER_ADDED: &str = "parameter_added";
    /// A parameter's value changed.
    pub const PARAMETER_CHANGED: &str = "parameter_changed";
}

/// A callback table any module or the engine can own.
#[derive(Default)]
pub struct EventEmitter {
    callbacks: HashMap<String, Vec<Callback>>,
}

impl EventEmitter {
    /// Creates an empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `callback` to `event`.
    pub fn on(&mut self, event: impl Into<String>, callback: Callback) {
        self.callbacks.entry(event.into()).or_default().push(callback);
    }

    /// Invokes every callback bound to `event` with `args`, in registration
    /// order. Returns [ControlFlow::Break] if any callback requested
    /// suppression (the emitter itself is the one responsible for deciding
    /// whether that means "stop bubbling" or something else, per the
    /// caller's needs).
    pub fn dispatch_local(&self, event: &str, args: &[Value]) -> ControlFlow<()> {
        let mut flow = ControlFlow::Continue(());
        if let Some(callbacks) = self.callbacks.get(event) {
            for callback in callbacks {
                if callback(args).is_break() {
                    flow = ControlFlow::Break(());
                }
            }
        }
        flow
    }
}

/// Dispatches `event` starting at the deepest emitter in `chain` (the
/// module that raised it) and bubbling up through each ancestor in turn,
/// ending at the engine (`chain`'s first element). Stops bubbling as soon as
/// any emitter's callbacks request suppression: if not suppressed, the
/// event is re-dispatched on the parent module, up to the engine.
///
/// `chain` must be ordered root-first (engine, then each module from the
/// topmost ancestor down to the one that raised the event); this function
/// walks it in reverse.
pub fn dispatch_bubbling(chain: &[&EventEmitter], event: &str, args: &[Value]) {
    for emitter in chain.iter().rev() {
        if emitter.dispatch_local(event, args).is_break() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn bubbles_from_leaf_to_root() {
        let mut engine = EventEmitter::new();
        let mut module = EventEmitter::new();
        let leaf = EventEmitter::new();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        engine.on(
            "parameter_changed",
            Box::new(move |_| {
                o1.lock().unwrap().push("engine");
                ControlFlow::Continue(())
            }),
        );
        let o2 = order.clone();
        module.on(
            "parameter_changed",
            Box::new(move |_| {
                o2.lock().unwrap().push("module");
                ControlFlow::Continue(())
            }),
        );

        dispatch_bubbling(&[&engine, &module, &leaf], "parameter_changed", &[]);
        assert_eq!(*order.lock().unwrap(), vec!["module", "engine"]);
    }

    #[test]
    fn suppression_stops_bubbling() {
        let mut engine = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        engine.on(
            "x",
            Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }),
        );
        let mut module = EventEmitter::new();
        module.on("x", Box::new(|_| ControlFlow::Break(())));

        dispatch_bubbling(&[&engine, &module], "x", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
