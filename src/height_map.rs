//! Height map generation
//!
//! Maps a noise grid through a response curve and multiplier into absolute
//! height values. Runs on worker threads, so the curve is snapshotted per call
//! and every input is taken by value or shared read-only reference.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::curve::HeightCurve;
use crate::falloff::generate_falloff_map;
use crate::grid::Grid;
use crate::noise_map::{generate_noise_map, NoiseSettings};

/// Settings for [`generate_height_map`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeightMapSettings {
    pub noise: NoiseSettings,
    /// Subtract a radial falloff mask from the noise before applying the
    /// curve, carving an island silhouette.
    pub use_falloff: bool,
    pub height_multiplier: f32,
    /// Response curve over the measured noise value (not over position).
    pub height_curve: HeightCurve,
}

impl HeightMapSettings {
    /// Lowest achievable height under these settings.
    pub fn min_height(&self) -> f32 {
        self.height_multiplier * self.height_curve.evaluate(0.0)
    }

    /// Highest achievable height under these settings.
    pub fn max_height(&self) -> f32 {
        self.height_multiplier * self.height_curve.evaluate(1.0)
    }
}

/// An immutable generated height grid with its discovered value range.
///
/// The grid includes the one-cell border on every side used later for normal
/// computation; `min_value`/`max_value` cover the non-border interior.
#[derive(Clone, Debug)]
pub struct HeightMap {
    pub values: Grid<f32>,
    pub min_value: f32,
    pub max_value: f32,
}

/// Generate a height map of `width` x `height` samples around `sample_center`.
pub fn generate_height_map(
    width: usize,
    height: usize,
    settings: &HeightMapSettings,
    sample_center: Vec2,
) -> HeightMap {
    let mut values = generate_noise_map(width, height, &settings.noise, sample_center);

    if settings.use_falloff {
        let falloff = generate_falloff_map(width.max(height));
        for (x, y, value) in values.iter_mut() {
            *value = (*value - falloff.get(x, y)).clamp(0.0, 1.0);
        }
    }

    // Each generation call works on its own copy of the curve; concurrent
    // calls on different threads never share evaluation state.
    let height_curve = settings.height_curve.clone();

    let mut min_value = f32::MAX;
    let mut max_value = f32::MIN;

    for (x, y, value) in values.iter_mut() {
        *value *= height_curve.evaluate(*value) * settings.height_multiplier;

        let interior = x > 0 && x + 1 < width && y > 0 && y + 1 < height;
        if interior || width <= 2 || height <= 2 {
            if *value > max_value {
                max_value = *value;
            }
            if *value < min_value {
                min_value = *value;
            }
        }
    }

    HeightMap {
        values,
        min_value,
        max_value,
    }
}
