// ============================================================
// Layer 4 — Geometric Transforms
// ============================================================
// Pure functions over (C, X, Y, Z) voxel arrays. None of them
// touch intensities except to fill voxels that have no source
// (padding, rotated-in corners).
//
// Coordinates follow the half-voxel convention used by most
// imaging libraries when resizing: output voxel i samples the
// input at (i + 0.5) * in / out - 0.5.

use ndarray::{s, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What to put in voxels that have no source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    /// Fill with 0.0
    Zero,
    /// Fill with the channel's minimum intensity
    Minimum,
}

impl FromStr for PaddingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero"            => Ok(PaddingMode::Zero),
            "minimum" | "min" => Ok(PaddingMode::Minimum),
            other => Err(format!("unknown padding '{other}' (expected zero or minimum)")),
        }
    }
}

/// Per-channel fill values for `mode`.
pub fn pad_values(data: &Array4<f32>, mode: PaddingMode) -> Vec<f32> {
    match mode {
        PaddingMode::Zero    => vec![0.0; data.shape()[0]],
        PaddingMode::Minimum => data
            .axis_iter(Axis(0))
            .map(|ch| ch.iter().copied().fold(f32::INFINITY, f32::min))
            .map(|m| if m.is_finite() { m } else { 0.0 })
            .collect(),
    }
}

// ─── Interpolation ────────────────────────────────────────────────────────────
/// Trilinear sample of channel `ch` at fractional position `p`.
/// Returns `None` when `p` lies outside the voxel grid.
fn sample_trilinear(data: &Array4<f32>, ch: usize, p: [f32; 3]) -> Option<f32> {
    let shape = data.shape();
    let mut lo   = [0usize; 3];
    let mut hi   = [0usize; 3];
    let mut frac = [0f32; 3];

    for a in 0..3 {
        let n = shape[a + 1];
        if n == 0 || p[a] < -1e-4 || p[a] > (n - 1) as f32 + 1e-4 {
            return None;
        }
        let c  = p[a].clamp(0.0, (n - 1) as f32);
        let f  = c.floor();
        lo[a]   = f as usize;
        hi[a]   = (lo[a] + 1).min(n - 1);
        frac[a] = c - f;
    }

    let v = |x: usize, y: usize, z: usize| data[[ch, x, y, z]];
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

    let c00 = lerp(v(lo[0], lo[1], lo[2]), v(hi[0], lo[1], lo[2]), frac[0]);
    let c10 = lerp(v(lo[0], hi[1], lo[2]), v(hi[0], hi[1], lo[2]), frac[0]);
    let c01 = lerp(v(lo[0], lo[1], hi[2]), v(hi[0], lo[1], hi[2]), frac[0]);
    let c11 = lerp(v(lo[0], hi[1], hi[2]), v(hi[0], hi[1], hi[2]), frac[0]);

    let c0 = lerp(c00, c10, frac[1]);
    let c1 = lerp(c01, c11, frac[1]);
    Some(lerp(c0, c1, frac[2]))
}

/// Resample every channel to `out` spatial voxels.
pub fn resize(data: &Array4<f32>, out: [usize; 3]) -> Array4<f32> {
    let (c, w, h, d) = data.dim();
    let input = [w, h, d];

    let source_coord = |axis: usize, i: usize| -> f32 {
        let scale = input[axis] as f32 / out[axis] as f32;
        ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, input[axis].saturating_sub(1) as f32)
    };

    Array4::from_shape_fn((c, out[0], out[1], out[2]), |(ch, x, y, z)| {
        let p = [source_coord(0, x), source_coord(1, y), source_coord(2, z)];
        sample_trilinear(data, ch, p).unwrap_or(0.0)
    })
}

/// Target shape that keeps the physical extent when moving to `target` spacing.
pub fn resampled_shape(shape: [usize; 3], spacing: [f32; 3], target: [f32; 3]) -> [usize; 3] {
    let mut out = [0usize; 3];
    for a in 0..3 {
        let n = (shape[a] as f32 * spacing[a] / target[a]).round() as usize;
        out[a] = n.max(1);
    }
    out
}

// ─── Flips ────────────────────────────────────────────────────────────────────
/// Mirror the given spatial axes (0 = X, 1 = Y, 2 = Z).
pub fn flip(mut data: Array4<f32>, axes: &[usize]) -> Array4<f32> {
    for &a in axes {
        data.invert_axis(Axis(a + 1));
    }
    data
}

/// Mirror each axis independently with probability `p`.
pub fn random_flip<R: Rng>(data: Array4<f32>, axes: &[usize], p: f64, rng: &mut R) -> Array4<f32> {
    let chosen: Vec<usize> = axes.iter().copied().filter(|_| rng.gen_bool(p)).collect();
    flip(data, &chosen)
}

// ─── Crop / Pad ───────────────────────────────────────────────────────────────
/// One axis worth of bookkeeping: copy `len` voxels from `src` to `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisWindow {
    src: usize,
    dst: usize,
    len: usize,
}

fn axis_window<R: Rng>(n: usize, target: usize, random: bool, rng: &mut R) -> AxisWindow {
    if n >= target {
        let slack = n - target;
        let src   = if random { rng.gen_range(0..=slack) } else { slack / 2 };
        AxisWindow { src, dst: 0, len: target }
    } else {
        let slack = target - n;
        let dst   = if random { rng.gen_range(0..=slack) } else { slack / 2 };
        AxisWindow { src: 0, dst, len: n }
    }
}

/// Force the spatial shape to exactly `target` by trimming and padding.
///
/// With `random_center` the crop/pad offset on each axis is drawn
/// uniformly; otherwise the input is centered (extra voxel goes to
/// the end).
pub fn crop_or_pad<R: Rng>(
    data:          &Array4<f32>,
    target:        [usize; 3],
    random_center: bool,
    padding:       PaddingMode,
    rng:           &mut R,
) -> Array4<f32> {
    let (c, w, h, d) = data.dim();
    let input = [w, h, d];

    let win: Vec<AxisWindow> = (0..3)
        .map(|a| axis_window(input[a], target[a], random_center, rng))
        .collect();

    let fills = pad_values(data, padding);
    let mut out = Array4::<f32>::zeros((c, target[0], target[1], target[2]));
    for (ch, fill) in fills.iter().enumerate() {
        out.index_axis_mut(Axis(0), ch).fill(*fill);
    }

    out.slice_mut(s![
        ..,
        win[0].dst..win[0].dst + win[0].len,
        win[1].dst..win[1].dst + win[1].len,
        win[2].dst..win[2].dst + win[2].len
    ])
    .assign(&data.slice(s![
        ..,
        win[0].src..win[0].src + win[0].len,
        win[1].src..win[1].src + win[1].len,
        win[2].src..win[2].src + win[2].len
    ]));

    out
}

// ─── Rotation ─────────────────────────────────────────────────────────────────
/// Rotate about spatial `axis` by `degrees`, around the grid center.
/// Voxels whose source falls outside the grid get the padding value.
pub fn rotate(data: &Array4<f32>, axis: usize, degrees: f32, padding: PaddingMode) -> Array4<f32> {
    let (c, w, h, d) = data.dim();
    let shape = [w, h, d];

    // The two axes spanning the rotation plane
    let (pa, pb) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let ca = (shape[pa] as f32 - 1.0) / 2.0;
    let cb = (shape[pb] as f32 - 1.0) / 2.0;

    let (sin, cos) = degrees.to_radians().sin_cos();
    let fills = pad_values(data, padding);

    Array4::from_shape_fn((c, w, h, d), |(ch, x, y, z)| {
        let idx = [x as f32, y as f32, z as f32];
        let (u, v) = (idx[pa] - ca, idx[pb] - cb);

        // inverse rotation: where does this output voxel come from
        let mut p = idx;
        p[pa] =  cos * u + sin * v + ca;
        p[pb] = -sin * u + cos * v + cb;

        sample_trilinear(data, ch, p).unwrap_or(fills[ch])
    })
}

/// Reorder (C, W, H, D) → (C, D, H, W) in standard memory layout.
pub fn to_canonical(data: Array4<f32>) -> Array4<f32> {
    data.permuted_axes([0, 3, 2, 1]).as_standard_layout().into_owned()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_fn(shape, |(c, x, y, z)| (c * 1000 + x * 100 + y * 10 + z) as f32)
    }

    #[test]
    fn test_resize_identity_shape_is_lossless() {
        let a = ramp((1, 4, 5, 6));
        assert_eq!(resize(&a, [4, 5, 6]), a);
    }

    #[test]
    fn test_resize_changes_shape() {
        let a = ramp((2, 4, 4, 4));
        let r = resize(&a, [8, 2, 3]);
        assert_eq!(r.shape(), &[2, 8, 2, 3]);
        // constant channel stays constant
        let flat = Array4::<f32>::from_elem((1, 3, 3, 3), 7.0);
        assert!(resize(&flat, [5, 2, 4]).iter().all(|v| (*v - 7.0).abs() < 1e-5));
    }

    #[test]
    fn test_resampled_shape_keeps_extent() {
        assert_eq!(resampled_shape([100, 100, 40], [0.5, 0.5, 2.0], [1.0, 1.0, 1.0]), [50, 50, 80]);
        assert_eq!(resampled_shape([1, 1, 1], [1.0, 1.0, 1.0], [10.0, 10.0, 10.0]), [1, 1, 1]);
    }

    #[test]
    fn test_flip_mirrors_axis() {
        let a = ramp((1, 3, 2, 2));
        let f = flip(a.clone(), &[0]);
        assert_eq!(f[[0, 0, 1, 1]], a[[0, 2, 1, 1]]);
        assert_eq!(flip(f, &[0]), a);
    }

    #[test]
    fn test_crop_centered() {
        let a = ramp((1, 6, 6, 6));
        let mut rng = StdRng::seed_from_u64(1);
        let c = crop_or_pad(&a, [2, 4, 6], false, PaddingMode::Zero, &mut rng);
        assert_eq!(c.shape(), &[1, 2, 4, 6]);
        assert_eq!(c[[0, 0, 0, 0]], a[[0, 2, 1, 0]]);
    }

    #[test]
    fn test_pad_uses_channel_minimum() {
        let a = Array4::<f32>::from_elem((2, 2, 2, 2), 5.0) + ramp((2, 2, 2, 2));
        let mut rng = StdRng::seed_from_u64(1);
        let p = crop_or_pad(&a, [4, 2, 2], false, PaddingMode::Minimum, &mut rng);
        assert_eq!(p.shape(), &[2, 4, 2, 2]);
        assert_eq!(p[[0, 0, 0, 0]], 5.0);
        assert_eq!(p[[1, 3, 0, 0]], 1005.0);
        assert_eq!(p[[0, 1, 0, 0]], a[[0, 0, 0, 0]]);

        let z = crop_or_pad(&a, [4, 2, 2], false, PaddingMode::Zero, &mut rng);
        assert_eq!(z[[1, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_random_crop_stays_inside() {
        let a = ramp((1, 10, 10, 10));
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let c = crop_or_pad(&a, [3, 3, 3], true, PaddingMode::Zero, &mut rng);
            assert_eq!(c.shape(), &[1, 3, 3, 3]);
            // a crop of a ramp is still a contiguous ramp
            assert_eq!(c[[0, 2, 0, 0]] - c[[0, 0, 0, 0]], 200.0);
        }
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let a = ramp((1, 5, 5, 3));
        let r = rotate(&a, 2, 0.0, PaddingMode::Zero);
        for (x, y) in a.iter().zip(r.iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_rotate_quarter_turn_moves_plane() {
        let mut a = Array4::<f32>::zeros((1, 5, 5, 1));
        a[[0, 4, 2, 0]] = 1.0;
        let r = rotate(&a, 2, 90.0, PaddingMode::Zero);
        let hot: Vec<_> = r.indexed_iter().filter(|(_, v)| **v > 0.5).map(|(i, _)| i).collect();
        assert_eq!(hot.len(), 1);
        let (_, x, y, _) = hot[0];
        assert_eq!((x, y), (2, 4));
    }

    #[test]
    fn test_to_canonical_reverses_spatial_axes() {
        let a = ramp((1, 2, 3, 4));
        let t = to_canonical(a.clone());
        assert_eq!(t.shape(), &[1, 4, 3, 2]);
        assert_eq!(t[[0, 3, 2, 1]], a[[0, 1, 2, 3]]);
        assert!(t.is_standard_layout());
    }
}
