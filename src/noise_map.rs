//! Layered Perlin noise map generation
//!
//! Produces a 2D grid of coherent noise by stacking octaves of gradient noise
//! with per-octave amplitude decay (persistence) and frequency growth
//! (lacunarity). Octave offsets come from a seeded ChaCha8 stream, so the same
//! seed and parameters reproduce the same map bit for bit.

use glam::Vec2;
use noise::{NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::grid::Grid;

/// How raw fBm sums are remapped into the output range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizeMode {
    /// Remap the observed per-call min/max to exactly [0, 1]. Chunk seams
    /// won't match, so this suits single standalone maps.
    #[default]
    Local,
    /// Remap against the theoretical maximum amplitude sum, so neighboring
    /// chunks sampled at different centers stay consistent. Output is clamped
    /// below at 0 but deliberately not capped at 1.
    Global,
}

/// Tuning parameters for [`generate_noise_map`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseSettings {
    /// Zoom factor; lower values produce larger features. Floored to 0.01.
    pub scale: f32,
    /// Number of stacked noise layers, at least 1.
    pub octaves: u32,
    /// Per-octave amplitude decay, in [0, 1].
    pub persistence: f32,
    /// Per-octave frequency growth, at least 1.
    pub lacunarity: f32,
    pub seed: i32,
    /// Manual pan across the noise field, added on top of the sample center.
    pub offset: Vec2,
    pub normalize_mode: NormalizeMode,
    /// Draw a fresh seed on every call instead of using `seed`.
    pub random_seed: bool,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            scale: 25.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            seed: 0,
            offset: Vec2::ZERO,
            normalize_mode: NormalizeMode::Local,
            random_seed: false,
        }
    }
}

impl NoiseSettings {
    /// Return a copy with every parameter clamped into its safe range.
    /// Generation never fails on out-of-range tuning values; it corrects them.
    pub fn validated(&self) -> Self {
        Self {
            scale: self.scale.max(0.01),
            octaves: self.octaves.max(1),
            persistence: self.persistence.clamp(0.0, 1.0),
            lacunarity: self.lacunarity.max(1.0),
            ..self.clone()
        }
    }
}

/// Generate a `width` x `height` grid of layered noise around `sample_center`.
///
/// Under [`NormalizeMode::Local`] the result spans [0, 1] exactly; under
/// [`NormalizeMode::Global`] it is non-negative but may exceed 1 where octaves
/// constructively interfere.
pub fn generate_noise_map(
    width: usize,
    height: usize,
    settings: &NoiseSettings,
    sample_center: Vec2,
) -> Grid<f32> {
    let settings = settings.validated();
    let seed = if settings.random_seed {
        rand::random()
    } else {
        settings.seed
    };

    let mut map = Grid::new_with(width, height, 0.0f32);

    // The gradient permutation stays fixed; all seeded variation enters
    // through the per-octave offsets below.
    let perlin = Perlin::new(0);
    let mut prng = ChaCha8Rng::seed_from_u64(seed as u64);

    let mut octave_offsets = Vec::with_capacity(settings.octaves as usize);
    let mut max_possible_height = 0.0f32;
    let mut amplitude = 1.0f32;
    for _ in 0..settings.octaves {
        // Larger offset ranges make the gradient lattice repeat visibly.
        let offset_x = prng.gen_range(-100_000..100_000) as f32 + settings.offset.x + sample_center.x;
        let offset_y = prng.gen_range(-100_000..100_000) as f32 - settings.offset.y - sample_center.y;
        octave_offsets.push(Vec2::new(offset_x, offset_y));

        max_possible_height += amplitude;
        amplitude *= settings.persistence;
    }

    let mut min_local = f32::MAX;
    let mut max_local = f32::MIN;

    // Offsetting by the half extents zooms toward the grid center rather
    // than the top-left corner.
    let half_width = width as f32 / 2.0;
    let half_height = height as f32 / 2.0;

    for y in 0..height {
        for x in 0..width {
            let mut amplitude = 1.0f32;
            let mut frequency = 1.0f32;
            let mut noise_height = 0.0f32;

            for offset in &octave_offsets {
                let sample_x = (x as f32 - half_width + offset.x) / settings.scale * frequency;
                let sample_y = (y as f32 - half_height + offset.y) / settings.scale * frequency;

                // Perlin output is already in [-1, 1].
                let perlin_value = perlin.get([sample_x as f64, sample_y as f64]) as f32;
                noise_height += perlin_value * amplitude;

                amplitude *= settings.persistence;
                frequency *= settings.lacunarity;
            }

            if noise_height > max_local {
                max_local = noise_height;
            }
            if noise_height < min_local {
                min_local = noise_height;
            }

            let value = match settings.normalize_mode {
                NormalizeMode::Local => noise_height,
                // Clamped below but not capped above; tall maxima survive.
                NormalizeMode::Global => {
                    ((noise_height + 1.0) / max_possible_height / 0.9).max(0.0)
                }
            };
            map.set(x, y, value);
        }
    }

    if settings.normalize_mode == NormalizeMode::Local {
        for (_, _, value) in map.iter_mut() {
            *value = inverse_lerp(min_local, max_local, *value);
        }
    }

    map
}

/// Where `v` sits between `a` and `b`, as a fraction. Returns 0 when the
/// range is empty.
fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if (b - a).abs() <= f32::EPSILON {
        0.0
    } else {
        (v - a) / (b - a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(seed: i32, mode: NormalizeMode) -> NoiseSettings {
        NoiseSettings {
            seed,
            normalize_mode: mode,
            ..NoiseSettings::default()
        }
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let s = settings(42, NormalizeMode::Local);
        let a = generate_noise_map(16, 16, &s, Vec2::ZERO);
        let b = generate_noise_map(16, 16, &s, Vec2::ZERO);
        for (x, y, v) in a.iter() {
            assert_eq!(*v, *b.get(x, y));
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate_noise_map(16, 16, &settings(1, NormalizeMode::Local), Vec2::ZERO);
        let b = generate_noise_map(16, 16, &settings(2, NormalizeMode::Local), Vec2::ZERO);
        let identical = a.iter().all(|(x, y, v)| *v == *b.get(x, y));
        assert!(!identical);
    }

    #[test]
    fn test_local_mode_spans_unit_range() {
        let map = generate_noise_map(32, 32, &settings(7, NormalizeMode::Local), Vec2::ZERO);
        let (min, max) = map.min_max();
        assert!(min.abs() < 1e-6, "min = {}", min);
        assert!((max - 1.0).abs() < 1e-6, "max = {}", max);
    }

    #[test]
    fn test_global_mode_is_clamped_below_only() {
        let map = generate_noise_map(32, 32, &settings(7, NormalizeMode::Global), Vec2::ZERO);
        let (min, _) = map.min_max();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_zero_scale_is_corrected() {
        let s = NoiseSettings {
            scale: 0.0,
            ..settings(3, NormalizeMode::Local)
        };
        let map = generate_noise_map(8, 8, &s, Vec2::ZERO);
        for (_, _, v) in map.iter() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn test_sample_center_shifts_the_field() {
        let s = settings(11, NormalizeMode::Global);
        let a = generate_noise_map(16, 16, &s, Vec2::ZERO);
        let b = generate_noise_map(16, 16, &s, Vec2::new(500.0, 0.0));
        let identical = a.iter().all(|(x, y, v)| *v == *b.get(x, y));
        assert!(!identical);
    }

    #[test]
    fn test_validated_clamps_parameters() {
        let s = NoiseSettings {
            scale: -3.0,
            octaves: 0,
            persistence: 2.0,
            lacunarity: 0.5,
            ..NoiseSettings::default()
        }
        .validated();
        assert_eq!(s.scale, 0.01);
        assert_eq!(s.octaves, 1);
        assert_eq!(s.persistence, 1.0);
        assert_eq!(s.lacunarity, 1.0);
    }
}
