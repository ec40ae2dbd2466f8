// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The easing function family: nine base curves, each of which derives
//! `out`/`inout`/`mirror`/`mirror-in`/`mirror-out`/`mirror-inout` variants
//! from its own `in` curve.

use crate::rng::Rng;
use std::f64::consts::PI;

/// A base interpolation curve, evaluated over progress `p` in `[0, 1]` and
/// returning an eased progress in (approximately) the same range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Curve {
    /// `p`
    Linear,
    /// `sin((p - 1) * pi / 2) + 1`
    Sine,
    /// `p^2`
    Quadratic,
    /// `p^3`
    Cubic,
    /// `p^4`
    Quartic,
    /// `p^5`
    Quintic,
    /// `2^(10(p-1))`, except exactly `0` at `p = 0`.
    Exponential,
    /// A fresh uniform random value per evaluation, except exactly `0` at
    /// `p = 0` and exactly `1` at `p = 1` (so animation endpoints are still
    /// exact even for this curve).
    Random,
    /// `sin(13*pi/2*p) * 2^(10(p-1))`
    Elastic,
}

impl Curve {
    /// Parses a curve by name, falling back to [Curve::Linear] and logging a
    /// warning on an unrecognized name.
    pub fn parse(name: &str) -> Curve {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(easing = name, "unknown easing curve, falling back to linear");
            Curve::Linear
        })
    }

    fn eval(&self, p: f64, rng: &mut Rng) -> f64 {
        match self {
            Curve::Linear => p,
            Curve::Sine => ((p - 1.0) * PI / 2.0).sin() + 1.0,
            Curve::Quadratic => p * p,
            Curve::Cubic => p * p * p,
            Curve::Quartic => p * p * p * p,
            Curve::Quintic => p * p * p * p * p,
            Curve::Exponential => {
                if p == 0.0 {
                    0.0
                } else {
                    2f64.powf(10.0 * (p - 1.0))
                }
            }
            Curve::Random => {
                if p == 0.0 || p == 1.0 {
                    p
                } else {
                    rng.rand_float()
                }
            }
            Curve::Elastic => (13.0 * PI / 2.0 * p).sin() * 2f64.powf(10.0 * (p - 1.0)),
        }
    }
}

/// The variant of a curve to apply, derived from the base `in` curve.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    /// The base curve, unmodified.
    In,
    /// `1 - in(1 - p)`
    Out,
    /// First half runs `in` at double speed; second half runs `out` at
    /// double speed.
    Inout,
    /// Same as [Mode::MirrorIn]; kept as a distinct alias because the OSC
    /// API accepts both spellings.
    Mirror,
    /// `in` played forward then backward across the midpoint.
    MirrorIn,
    /// `out` played forward then backward across the midpoint.
    MirrorOut,
    /// `inout` played forward then backward across the midpoint.
    MirrorInout,
}

fn flip(p: f64) -> f64 {
    1.0 - p
}

fn ease_in(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    curve.eval(p, rng)
}

fn ease_out(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    flip(ease_in(curve, flip(p), rng))
}

fn ease_inout(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    if p < 0.5 {
        ease_in(curve, 2.0 * p, rng) * 0.5
    } else {
        ease_out(curve, 2.0 * (p - 0.5), rng) * 0.5 + 0.5
    }
}

fn mirror_in(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    if p <= 0.5 {
        ease_in(curve, 2.0 * p, rng)
    } else {
        ease_in(curve, flip(2.0 * (p - 0.5)), rng)
    }
}

fn mirror_out(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    if p <= 0.5 {
        ease_out(curve, 2.0 * p, rng)
    } else {
        ease_out(curve, flip(2.0 * (p - 0.5)), rng)
    }
}

fn mirror_inout(curve: Curve, p: f64, rng: &mut Rng) -> f64 {
    if p <= 0.5 {
        ease_inout(curve, 2.0 * p, rng)
    } else {
        ease_inout(curve, flip(2.0 * (p - 0.5)), rng)
    }
}

fn lerp(start: f64, end: f64, p: f64) -> f64 {
    start + (end - start) * p
}

/// Evaluates `curve`/`mode` at progress `p` and interpolates the result
/// between `from` and `to`. `rng` supplies randomness for [Curve::Random];
/// every other curve ignores it.
pub fn ease(curve: Curve, mode: Mode, from: f64, to: f64, p: f64, rng: &mut Rng) -> f64 {
    let t = match mode {
        Mode::In => ease_in(curve, p, rng),
        Mode::Out => ease_out(curve, p, rng),
        Mode::Inout => ease_inout(curve, p, rng),
        Mode::Mirror | Mode::MirrorIn => mirror_in(curve, p, rng),
        Mode::MirrorOut => mirror_out(curve, p, rng),
        Mode::MirrorInout => mirror_inout(curve, p, rng),
    };
    lerp(from, to, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn rng() -> Rng {
        Rng::default()
    }

    #[test]
    fn linear_in_is_identity() {
        let mut r = rng();
        for i in 0..=10 {
            let p = i as f64 / 10.0;
            assert!(approx_eq!(f64, ease(Curve::Linear, Mode::In, 0.0, 10.0, p, &mut r), p * 10.0));
        }
    }

    #[test]
    fn every_curve_hits_exact_endpoints() {
        let mut r = rng();
        for curve in [
            Curve::Linear,
            Curve::Sine,
            Curve::Quadratic,
            Curve::Cubic,
            Curve::Quartic,
            Curve::Quintic,
            Curve::Exponential,
            Curve::Random,
            Curve::Elastic,
        ] {
            for mode in [
                Mode::In,
                Mode::Out,
                Mode::Inout,
                Mode::MirrorIn,
                Mode::MirrorOut,
                Mode::MirrorInout,
            ] {
                let start = ease(curve, mode, 0.0, 10.0, 0.0, &mut r);
                let end = ease(curve, mode, 0.0, 10.0, 1.0, &mut r);
                assert!(
                    approx_eq!(f64, start, 0.0, epsilon = 1e-9),
                    "{curve:?} {mode:?} should start at 0.0, got {start}"
                );
                assert!(
                    approx_eq!(f64, end, 10.0, epsilon = 1e-9),
                    "{curve:?} {mode:?} should end at 10.0, got {end}"
                );
            }
        }
    }

    #[test]
    fn random_varies_between_endpoints() {
        let mut r = rng();
        let samples: Vec<f64> = (0..5)
            .map(|_| ease(Curve::Random, Mode::In, 0.0, 1.0, 0.5, &mut r))
            .collect();
        assert!(samples.iter().any(|&s| s != samples[0]));
    }

    #[test]
    fn unknown_name_falls_back_to_linear() {
        assert_eq!(Curve::parse("not-a-real-curve"), Curve::Linear);
        assert_eq!(Curve::parse("sine"), Curve::Sine);
    }

    #[test]
    fn out_is_flip_of_in_on_flipped_input() {
        let mut r = rng();
        for i in 0..=10 {
            let p = i as f64 / 10.0;
            let out = ease(Curve::Quadratic, Mode::Out, 0.0, 1.0, p, &mut r);
            let expected = 1.0 - ease(Curve::Quadratic, Mode::In, 0.0, 1.0, 1.0 - p, &mut r);
            assert!(approx_eq!(f64, out, expected));
        }
    }
}
