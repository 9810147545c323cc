// ============================================================
// Layer 4 — Intensity Transforms
// ============================================================
// Robust per-channel standardization and the two intensity
// augmentations (negation, additive Gaussian noise).
//
// Foreground mask: a voxel counts when it is strictly above the
// channel minimum and strictly below the channel maximum. Padding
// (filled with the minimum) and saturated voxels therefore never
// shift the statistics. A channel with no such voxel falls back to
// using every voxel.

use anyhow::{Context, Result};
use ndarray::{Array4, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Below this a channel is treated as constant and only centered.
const MIN_STD: f32 = 1e-6;

/// Linear-interpolated percentile of an ascending slice, `q` in [0, 100].
pub fn percentile(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo   = rank.floor() as usize;
    let hi   = (lo + 1).min(sorted.len() - 1);
    let t    = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * t
}

/// Clip each channel to its foreground percentiles, then standardize
/// with the foreground mean and (sample) standard deviation.
pub fn z_normalize(mut data: Array4<f32>, percentiles: (f32, f32)) -> Array4<f32> {
    for mut ch in data.axis_iter_mut(Axis(0)) {
        let (min, max) = ch.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

        let mut fg: Vec<f32> = ch.iter().copied().filter(|&v| v > min && v < max).collect();
        if fg.is_empty() {
            fg = ch.iter().copied().collect();
        }
        if fg.is_empty() {
            continue;
        }
        fg.sort_unstable_by(|a, b| a.total_cmp(b));

        let lo = percentile(&fg, percentiles.0);
        let hi = percentile(&fg, percentiles.1);

        let clipped: Vec<f32> = fg.iter().map(|v| v.clamp(lo, hi)).collect();
        let n    = clipped.len() as f32;
        let mean = clipped.iter().sum::<f32>() / n;
        let var  = if clipped.len() > 1 {
            clipped.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0)
        } else {
            0.0
        };
        let std = var.sqrt();

        if std.is_finite() && std > MIN_STD {
            ch.mapv_inplace(|v| (v.clamp(lo, hi) - mean) / std);
        } else {
            ch.mapv_inplace(|v| v.clamp(lo, hi) - mean);
        }
    }
    data
}

/// With probability `negate_probability` flip the sign of every voxel,
/// then add zero-mean Gaussian noise whose std is drawn from `std_range`.
pub fn negate_and_noise<R: Rng>(
    mut data:           Array4<f32>,
    negate_probability: f64,
    std_range:          (f32, f32),
    rng:                &mut R,
) -> Result<Array4<f32>> {
    if rng.gen_bool(negate_probability) {
        data.mapv_inplace(|v| -v);
    }

    let std = if std_range.1 > std_range.0 {
        rng.gen_range(std_range.0..std_range.1)
    } else {
        std_range.0
    };
    if std <= 0.0 {
        return Ok(data);
    }

    let normal = Normal::new(0.0f32, std)
        .with_context(|| format!("invalid noise std {std}"))?;
    data.mapv_inplace(|v| v + normal.sample(&mut *rng));
    Ok(data)
}
