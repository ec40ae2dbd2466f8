// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A typed value slot plus its animation state: static leading values, a
//! settable dynamic tail, dirty/last-sent bookkeeping, and an optional
//! running [Animation].

use crate::easing::{self, Curve, Mode as EasingMode};
use crate::rng::Rng;
use crate::value::{TypeTag, Value};
use std::collections::HashMap;

/// The unit a duration is expressed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeMode {
    /// Duration is in musical beats; converted to nanoseconds using the
    /// tempo in effect when the animation started. A later tempo change
    /// does not re-scale an already-running animation's remaining time.
    Beats,
    /// Duration is in seconds.
    Seconds,
}

/// A running (or just-finished) animation, started by `Parameter::animate`.
#[derive(Clone, Debug)]
pub struct Animation {
    /// Monotonic start time, nanoseconds.
    pub start_ns: u64,
    /// Duration, nanoseconds (already converted from beats if applicable).
    pub duration_ns: u64,
    /// Starting values, one per dynamic value.
    pub from: Vec<f64>,
    /// Ending values, one per dynamic value.
    pub to: Vec<f64>,
    /// Easing curve.
    pub curve: Curve,
    /// Easing mode (in/out/inout/mirror variants).
    pub easing_mode: EasingMode,
    /// Whether the animation restarts from `from` when it completes instead
    /// of stopping.
    pub loop_: bool,
}

impl Animation {
    /// Evaluates the animation at `current_time_ns`, returning the new
    /// values and whether the animation is still running afterward. Clamps
    /// elapsed time to the duration, then runs the easing function over
    /// `[0, 1]`.
    fn evaluate(&self, current_time_ns: u64, rng: &mut Rng) -> (Vec<f64>, bool) {
        let elapsed = current_time_ns.saturating_sub(self.start_ns);
        let (t, running) = if elapsed >= self.duration_ns {
            (self.duration_ns, self.loop_)
        } else {
            (elapsed, true)
        };
        let p = if self.duration_ns == 0 {
            1.0
        } else {
            t as f64 / self.duration_ns as f64
        };
        let values = self
            .from
            .iter()
            .zip(self.to.iter())
            .map(|(from, to)| easing::ease(self.curve, self.easing_mode, *from, *to, p, rng))
            .collect();
        (values, running)
    }
}

/// A typed, named value slot of a module. Owns both its
/// current runtime state and its static configuration (typetags, default,
/// address).
#[derive(Debug)]
pub struct Parameter {
    /// Name, unique within the owning module's namespace.
    pub name: String,
    /// Outbound OSC address; `None` means the parameter is internal-only.
    pub address: Option<String>,
    /// The fixed typetag sequence: static leading tags plus dynamic tags.
    pub types: Vec<TypeTag>,
    /// How many of `types` (from the front) are static — set once at
    /// construction and never changed by `set()`.
    pub static_count: usize,
    /// Current values: `static_count` static values followed by the dynamic
    /// ones.
    values: Vec<Value>,
    /// Last values actually sent on the outbound port.
    last_sent: Vec<Value>,
    /// Default dynamic values, assigned at construction.
    pub default: Vec<Value>,
    /// Free-form metadata (units, descriptions, UI hints).
    pub metadata: HashMap<String, String>,
    /// Whether the parameter has pending changes not yet published.
    pub dirty: bool,
    /// Wall-clock timestamp (ns) the parameter became dirty.
    pub dirty_since_ns: u64,
    /// Set by `force_send`: the next dirty sweep emits this parameter even
    /// if its current values equal what was last sent.
    force_pending: bool,
    /// The running animation, if any.
    pub animation: Option<Animation>,
}

impl Parameter {
    /// Creates a parameter with the given typetags and static leading
    /// values, assigning `default` immediately (which may make it dirty).
    pub fn new(
        name: impl Into<String>,
        address: Option<String>,
        types: Vec<TypeTag>,
        static_values: Vec<Value>,
        default: Vec<Value>,
        current_time_ns: u64,
    ) -> Self {
        let static_count = static_values.len();
        let dynamic_count = types.len() - static_count;
        let mut values = static_values.clone();
        values.extend(std::iter::repeat(Value::Nil).take(dynamic_count));
        let mut p = Self {
            name: name.into(),
            address,
            types,
            static_count,
            values,
            last_sent: Vec::new(),
            default: default.clone(),
            metadata: HashMap::new(),
            dirty: false,
            dirty_since_ns: 0,
            force_pending: false,
            animation: None,
        };
        if !default.is_empty() {
            p.set(&default, current_time_ns, false);
        }
        p
    }

    /// How many dynamic (settable) values this parameter holds.
    pub fn arity(&self) -> usize {
        self.types.len() - self.static_count
    }

    /// The current dynamic values.
    pub fn get(&self) -> &[Value] {
        &self.values[self.static_count..]
    }

    /// All values including the static leading ones, as sent on the wire.
    pub fn message_args(&self) -> &[Value] {
        &self.values
    }

    /// Type-casts `args` per the typetag sequence and writes them if they
    /// differ from the current values, marking the parameter dirty.
    /// Returns whether anything changed. Cancels a running animation unless
    /// `preserve_animation` is set: by default the later call wins.
    pub fn set(&mut self, args: &[Value], current_time_ns: u64, preserve_animation: bool) -> bool {
        if args.len() != self.arity() {
            tracing::warn!(
                parameter = %self.name,
                expected = self.arity(),
                got = args.len(),
                "set: wrong number of arguments"
            );
            return false;
        }
        if !preserve_animation {
            self.animation = None;
        }
        let mut changed = false;
        for (i, arg) in args.iter().enumerate() {
            let tag = self.types[self.static_count + i];
            let cast = arg.cast(tag);
            let slot = &mut self.values[self.static_count + i];
            if *slot != cast {
                *slot = cast;
                changed = true;
            }
        }
        if changed {
            self.dirty = true;
            self.dirty_since_ns = current_time_ns;
        }
        changed
    }

    /// Marks `last_sent` equal to the current values, as done right after an
    /// outbound message is flushed.
    pub fn mark_sent(&mut self) {
        self.last_sent = self.values.clone();
        self.dirty = false;
        self.force_pending = false;
    }

    /// Whether the current values differ from the last-sent ones (emission
    /// is otherwise gated on this: a parameter is only flushed once its
    /// current values diverge from what was last put on the wire).
    pub fn differs_from_last_sent(&self) -> bool {
        self.last_sent.is_empty() || self.values != self.last_sent
    }

    /// Marks the parameter dirty even though its values may be unchanged,
    /// so the next dirty sweep emits it regardless of
    /// [Parameter::differs_from_last_sent]. Used for forced re-sends (e.g.
    /// loading a snapshot with identical values, or a user asking for an
    /// echo).
    pub fn force_send(&mut self, current_time_ns: u64) {
        self.dirty = true;
        self.dirty_since_ns = current_time_ns;
        self.force_pending = true;
    }

    /// Whether a forced send is pending. Consumes the flag.
    pub fn take_force_pending(&mut self) -> bool {
        std::mem::replace(&mut self.force_pending, false)
    }

    /// Starts an animation. `start`/`end` of `None` borrow the current value
    /// (only valid for single-value parameters).
    /// Unknown easing names fall back to linear.
    #[allow(clippy::too_many_arguments)]
    pub fn animate(
        &mut self,
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
        let from = match start {
            Some(v) => v,
            None => {
                if self.arity() != 1 {
                    tracing::warn!(
                        parameter = %self.name,
                        "animate: start=None is only valid for single-value parameters"
                    );
                    return;
                }
                vec![self.get()[0].as_f64().unwrap_or_default()]
            }
        };
        if from.len() != self.arity() || end.len() != self.arity() {
            tracing::warn!(parameter = %self.name, "animate: wrong number of values for 'from'/'to'");
            return;
        }
        let duration_ns = match mode {
            TimeMode::Beats => (duration * 60.0 / tempo * 1_000_000_000.0) as u64,
            TimeMode::Seconds => (duration * 1_000_000_000.0) as u64,
        };
        let curve = Curve::parse(easing_name);
        self.animation = Some(Animation {
            start_ns: current_time_ns,
            duration_ns,
            from,
            to: end,
            curve,
            easing_mode,
            loop_,
        });
    }

    /// Stops any running animation without changing the current value.
    pub fn stop_animation(&mut self) {
        self.animation = None;
    }

    /// Advances a running animation to `current_time_ns`, writing the new
    /// value through `set` (so dirty/last-sent bookkeeping is shared).
    /// Returns whether the value changed. A non-looping animation that
    /// completes is removed.
    pub fn update_animation(&mut self, current_time_ns: u64, rng: &mut Rng) -> bool {
        let Some(animation) = self.animation.clone() else {
            return false;
        };
        let (values, running) = animation.evaluate(current_time_ns, rng);
        let args: Vec<Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Value::Double(v).cast(self.types[self.static_count + i]))
            .collect();
        let changed = self.set(&args, current_time_ns, true);
        if !running {
            self.animation = None;
        } else if animation.loop_ && current_time_ns.saturating_sub(animation.start_ns) >= animation.duration_ns {
            // Looped past the end: re-arm so the next tick's elapsed time is
            // measured from here, not from the original start.
            if let Some(a) = &mut self.animation {
                a.start_ns = current_time_ns;
            }
        }
        changed
    }

    /// Whether an animation is currently running.
    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(types: Vec<TypeTag>, default: Vec<Value>) -> Parameter {
        Parameter::new("x", Some("/x".into()), types, vec![], default, 0)
    }

    #[test]
    fn set_with_no_change_does_not_mark_dirty_twice() {
        let mut param = p(vec![TypeTag::Double], vec![Value::Double(0.0)]);
        param.mark_sent();
        assert!(!param.set(&[Value::Double(0.0)], 1, false));
        assert!(!param.dirty);
        assert!(param.set(&[Value::Double(0.5)], 2, false));
        assert!(param.dirty);
    }

    #[test]
    fn differs_from_last_sent_before_first_send() {
        let param = p(vec![TypeTag::Double], vec![Value::Double(0.0)]);
        assert!(param.differs_from_last_sent());
    }

    #[test]
    fn animation_reaches_exact_endpoint() {
        let mut param = p(vec![TypeTag::Double], vec![Value::Double(0.0)]);
        param.mark_sent();
        param.animate(
            Some(vec![0.0]),
            vec![1.0],
            1.0,
            TimeMode::Seconds,
            120.0,
            "linear",
            EasingMode::In,
            false,
            0,
        );
        let mut rng = Rng::default();
        let mut last = 0.0;
        for t_ms in [0u64, 250, 500, 750, 1000] {
            param.update_animation(t_ms * 1_000_000, &mut rng);
            let v = param.get()[0].as_f64().unwrap();
            assert!(v >= last, "expected monotonic increase, got {v} after {last}");
            last = v;
        }
        assert_eq!(param.get()[0], Value::Double(1.0));
        assert!(!param.is_animating());
    }

    #[test]
    fn set_cancels_running_animation() {
        let mut param = p(vec![TypeTag::Double], vec![Value::Double(0.0)]);
        param.animate(
            Some(vec![0.0]),
            vec![1.0],
            1.0,
            TimeMode::Seconds,
            120.0,
            "linear",
            EasingMode::In,
            false,
            0,
        );
        assert!(param.is_animating());
        param.set(&[Value::Double(0.25)], 0, false);
        assert!(!param.is_animating());
    }

    #[test]
    fn beats_mode_uses_tempo_at_animation_start() {
        let mut param = p(vec![TypeTag::Double], vec![Value::Double(0.0)]);
        param.animate(
            Some(vec![0.0]),
            vec![1.0],
            1.0,
            TimeMode::Beats,
            60.0,
            "linear",
            EasingMode::In,
            false,
            0,
        );
        assert_eq!(param.animation.as_ref().unwrap().duration_ns, 1_000_000_000);
    }
}
