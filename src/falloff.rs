//! Radial falloff masks
//!
//! A square grid whose values rise from the center toward the edges.
//! Subtracting it from a noise map before the height curve carves an island
//! silhouette: shores at the rim, open terrain in the middle.

use crate::grid::Grid;

// Shape of the transition band between "no effect" and "full falloff".
const FALLOFF_STEEPNESS: f32 = 3.0;
const FALLOFF_MIDPOINT: f32 = 2.2;

/// Generate a `size` x `size` falloff mask in roughly [0, 1].
///
/// Each cell maps its coordinates to [-1, 1], takes the Chebyshev distance
/// `max(|x|, |y|)` from the center and shapes it through a smoothstep-like
/// rational curve. The result is symmetric under 90-degree rotation and under
/// reflection across both center axes.
pub fn generate_falloff_map(size: usize) -> Grid<f32> {
    let mut map = Grid::new_with(size, size, 0.0f32);
    if size < 2 {
        return map;
    }

    let span = (size - 1) as f32;
    for y in 0..size {
        for x in 0..size {
            let nx = x as f32 / span * 2.0 - 1.0;
            let ny = y as f32 / span * 2.0 - 1.0;
            let value = nx.abs().max(ny.abs());
            map.set(x, y, falloff_response(value));
        }
    }

    map
}

/// `v^a / (v^a + (b - b*v)^a)`: ~0 near the center, ~1 at the edge, with a
/// steep transition controlled by the two constants.
fn falloff_response(value: f32) -> f32 {
    let a = FALLOFF_STEEPNESS;
    let b = FALLOFF_MIDPOINT;
    let va = value.powf(a);
    va / (va + (b - b * value).powf(a))
}
