//! Height response curves
//!
//! A keyframed curve mapping measured noise height to a response factor,
//! evaluated with cubic Hermite interpolation between keys. Generation threads
//! snapshot the curve per call, so evaluation takes `&self` and never mutates.

use serde::{Deserialize, Serialize};

/// A single key on a [`HeightCurve`].
///
/// Tangents are slopes (dv/dt) at the key, matching the usual keyframe-curve
/// convention; a straight segment between two keys uses the chord slope as
/// both the outgoing and incoming tangent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    pub in_tangent: f32,
    pub out_tangent: f32,
}

impl Keyframe {
    pub fn new(time: f32, value: f32, in_tangent: f32, out_tangent: f32) -> Self {
        Self {
            time,
            value,
            in_tangent,
            out_tangent,
        }
    }

    /// A key with flat tangents (ease in/out through this point).
    pub fn flat(time: f32, value: f32) -> Self {
        Self::new(time, value, 0.0, 0.0)
    }
}

/// Piecewise cubic Hermite curve over `[first key time, last key time]`.
///
/// Inputs outside that range clamp to the end values, so evaluation is total:
/// any input produces a defined, stable output. A curve with fewer than two
/// keys evaluates to a constant (the single key's value, or 0.0 when empty).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightCurve {
    keys: Vec<Keyframe>,
}

impl HeightCurve {
    /// Build a curve from keys, sorting them by time.
    pub fn new(mut keys: Vec<Keyframe>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// The identity curve: evaluate(t) == t over [0, 1].
    pub fn identity() -> Self {
        Self::linear(&[(0.0, 0.0), (1.0, 1.0)])
    }

    /// Build a piecewise-linear curve through the given (time, value) points.
    /// Tangents are derived from the chord slopes so every segment is straight.
    pub fn linear(points: &[(f32, f32)]) -> Self {
        let mut keys: Vec<Keyframe> = points
            .iter()
            .map(|&(t, v)| Keyframe::new(t, v, 0.0, 0.0))
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        for i in 0..keys.len().saturating_sub(1) {
            let dt = keys[i + 1].time - keys[i].time;
            let slope = if dt.abs() > f32::EPSILON {
                (keys[i + 1].value - keys[i].value) / dt
            } else {
                0.0
            };
            keys[i].out_tangent = slope;
            keys[i + 1].in_tangent = slope;
        }
        Self { keys }
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    /// Evaluate the curve at `t`.
    pub fn evaluate(&self, t: f32) -> f32 {
        match self.keys.len() {
            0 => 0.0,
            1 => self.keys[0].value,
            _ => {
                let first = &self.keys[0];
                let last = &self.keys[self.keys.len() - 1];
                if t <= first.time {
                    return first.value;
                }
                if t >= last.time {
                    return last.value;
                }

                // Find the segment containing t.
                let seg = self
                    .keys
                    .windows(2)
                    .position(|w| t >= w[0].time && t <= w[1].time)
                    .unwrap_or(self.keys.len() - 2);
                let k0 = &self.keys[seg];
                let k1 = &self.keys[seg + 1];

                hermite(k0, k1, t)
            }
        }
    }
}

impl Default for HeightCurve {
    fn default() -> Self {
        Self::identity()
    }
}

/// Cubic Hermite interpolation between two keys at absolute time `t`.
fn hermite(k0: &Keyframe, k1: &Keyframe, t: f32) -> f32 {
    let dt = k1.time - k0.time;
    if dt.abs() <= f32::EPSILON {
        return k0.value;
    }
    let s = (t - k0.time) / dt;
    let s2 = s * s;
    let s3 = s2 * s;

    // Standard Hermite basis; tangents are slopes, scaled by segment length.
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    h00 * k0.value + h10 * dt * k0.out_tangent + h01 * k1.value + h11 * dt * k1.in_tangent
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_identity_curve() {
        let curve = HeightCurve::identity();
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            assert!((curve.evaluate(t) - t).abs() < EPS, "t = {}", t);
        }
    }

    #[test]
    fn test_extrapolation_clamps_to_end_values() {
        let curve = HeightCurve::linear(&[(0.0, 0.2), (1.0, 0.8)]);
        assert!((curve.evaluate(-5.0) - 0.2).abs() < EPS);
        assert!((curve.evaluate(7.0) - 0.8).abs() < EPS);
    }

    #[test]
    fn test_degenerate_curves_are_total() {
        let empty = HeightCurve::new(vec![]);
        assert_eq!(empty.evaluate(0.5), 0.0);

        let single = HeightCurve::new(vec![Keyframe::flat(0.3, 0.9)]);
        assert_eq!(single.evaluate(0.0), 0.9);
        assert_eq!(single.evaluate(1.0), 0.9);
    }

    #[test]
    fn test_passes_through_keys() {
        let curve = HeightCurve::new(vec![
            Keyframe::flat(0.0, 0.0),
            Keyframe::flat(0.4, 0.1),
            Keyframe::flat(1.0, 1.0),
        ]);
        assert!((curve.evaluate(0.0) - 0.0).abs() < EPS);
        assert!((curve.evaluate(0.4) - 0.1).abs() < EPS);
        assert!((curve.evaluate(1.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_flat_tangents_ease_between_keys() {
        // With flat tangents the midpoint of a segment is the average of the
        // endpoint values (Hermite h00 = h01 = 0.5 at s = 0.5).
        let curve = HeightCurve::new(vec![Keyframe::flat(0.0, 0.0), Keyframe::flat(1.0, 1.0)]);
        assert!((curve.evaluate(0.5) - 0.5).abs() < EPS);
        // Eases: below the chord in the first half.
        assert!(curve.evaluate(0.25) < 0.25);
    }

    #[test]
    fn test_unsorted_keys_are_sorted() {
        let curve = HeightCurve::linear(&[(1.0, 1.0), (0.0, 0.0)]);
        assert!((curve.evaluate(0.5) - 0.5).abs() < EPS);
        let times: Vec<f32> = curve.keys().iter().map(|k| k.time).collect();
        assert_eq!(times, vec![0.0, 1.0]);

        let curve = HeightCurve::new(vec![Keyframe::flat(0.7, 0.0), Keyframe::flat(0.2, 1.0)]);
        let times: Vec<f32> = curve.keys().iter().map(|k| k.time).collect();
        assert_eq!(times, vec![0.2, 0.7]);
    }
}
