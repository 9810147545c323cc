// ============================================================
// Layer 4 — Transform Pipeline
// ============================================================
// Turns a freshly loaded scan into a network input. The pipeline
// is an ordered list of stages built once from TransformConfig;
// a disabled option simply contributes no stage.
//
//   Resize      → trilinear to a fixed grid          (optional)
//   Resample    → trilinear to a fixed voxel spacing (optional)
//   Flip        → orientation correction, axis Y     (default on)
//   CropOrPad   → exact spatial shape                (default 224×224×32)
//   Normalize   → robust per-channel z-score
//   Rotate      → random rotation about Z            (augmentation)
//   RandomFlip  → mirror X/Y/Z, p = 0.5 each         (augmentation)
//   Noise       → random negation + Gaussian noise   (augmentation)
//   ToTensor    → (C, W, H, D) → (C, D, H, W)        (default on)
//
// Order matters: statistics in Normalize must see the final field
// of view, and ToTensor must come last because every stage before
// it indexes spatial axes in (W, H, D) order.
//
// Every stage draws randomness from the RNG handed to apply(), so
// a pipeline with no random stage always yields the same output
// for the same input.

/// Resize, resample, flips, crop/pad, rotation
pub mod geometry;

/// Robust z-normalization, negation, additive noise
pub mod intensity;

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::volume::{AxisLayout, Volume};
pub use geometry::PaddingMode;

// ─── TransformConfig ──────────────────────────────────────────────────────────
/// Constructor-level switches for the standard pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Resize to this (W, H, D) grid first
    pub image_resize:       Option<[usize; 3]>,
    /// Resample to this voxel spacing (mm)
    pub resample:           Option<[f32; 3]>,
    /// Mirror axis Y so slices display upright
    pub orientation_flip:   bool,
    /// Random mirror along each spatial axis
    pub flip:               bool,
    /// Crop or pad to this (W, H, D) shape
    pub image_crop:         Option<[usize; 3]>,
    /// Random instead of centered crop/pad offset
    pub random_center:      bool,
    /// Fill policy for padding and rotation
    pub padding:            PaddingMode,
    /// Percentile window for robust normalization
    pub norm_percentiles:   (f32, f32),
    /// Random rotation about `rotate_axis`
    pub random_rotate:      bool,
    pub rotate_axis:        usize,
    pub rotate_max_degrees: f32,
    /// Random negation + additive Gaussian noise
    pub noise:              bool,
    pub negate_probability: f64,
    pub noise_std:          (f32, f32),
    /// Convert to (C, D, H, W)
    pub to_tensor:          bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            image_resize:       None,
            resample:           None,
            orientation_flip:   true,
            flip:               false,
            image_crop:         Some([224, 224, 32]),
            random_center:      false,
            padding:            PaddingMode::Minimum,
            norm_percentiles:   (0.5, 99.5),
            random_rotate:      false,
            rotate_axis:        2,
            rotate_max_degrees: 90.0,
            noise:              false,
            negate_probability: 0.5,
            noise_std:          (0.0, 0.25),
            to_tensor:          true,
        }
    }
}

impl TransformConfig {
    /// The evaluation variant: same geometry, no augmentation
    pub fn deterministic(&self) -> Self {
        Self {
            flip:          false,
            random_center: false,
            random_rotate: false,
            noise:         false,
            ..self.clone()
        }
    }
}

// ─── TransformStage ───────────────────────────────────────────────────────────
/// One step of the pipeline, carrying its own parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStage {
    Resize     { shape: [usize; 3] },
    Resample   { spacing: [f32; 3] },
    Flip       { axes: Vec<usize> },
    RandomFlip { axes: Vec<usize>, probability: f64 },
    CropOrPad  { shape: [usize; 3], random_center: bool, padding: PaddingMode },
    Normalize  { percentiles: (f32, f32) },
    Rotate     { axis: usize, max_degrees: f32, padding: PaddingMode },
    Noise      { negate_probability: f64, std_range: (f32, f32) },
    ToTensor,
}

impl TransformStage {
    pub fn name(&self) -> &'static str {
        match self {
            TransformStage::Resize { .. }     => "Resize",
            TransformStage::Resample { .. }   => "Resample",
            TransformStage::Flip { .. }       => "Flip",
            TransformStage::RandomFlip { .. } => "RandomFlip",
            TransformStage::CropOrPad { .. }  => "CropOrPad",
            TransformStage::Normalize { .. }  => "Normalize",
            TransformStage::Rotate { .. }     => "Rotate",
            TransformStage::Noise { .. }      => "Noise",
            TransformStage::ToTensor          => "ToTensor",
        }
    }

    /// Whether the stage consumes randomness
    pub fn is_random(&self) -> bool {
        match self {
            TransformStage::RandomFlip { .. } | TransformStage::Rotate { .. } | TransformStage::Noise { .. } => true,
            TransformStage::CropOrPad { random_center, .. } => *random_center,
            _ => false,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            TransformStage::Resize { shape } | TransformStage::CropOrPad { shape, .. } => {
                if shape.iter().any(|&n| n == 0) {
                    bail!("{}: every dimension must be > 0, got {:?}", self.name(), shape);
                }
            }
            TransformStage::Resample { spacing } => {
                if spacing.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                    bail!("Resample: spacing must be positive, got {:?}", spacing);
                }
            }
            TransformStage::Flip { axes } | TransformStage::RandomFlip { axes, .. } => {
                if axes.iter().any(|&a| a > 2) {
                    bail!("{}: axes must be 0, 1 or 2, got {:?}", self.name(), axes);
                }
            }
            TransformStage::Normalize { percentiles: (lo, hi) } => {
                if !(0.0 <= *lo && lo < hi && *hi <= 100.0) {
                    bail!("Normalize: need 0 <= low < high <= 100, got ({lo}, {hi})");
                }
            }
            TransformStage::Rotate { axis, max_degrees, .. } => {
                if *axis > 2 || !max_degrees.is_finite() {
                    bail!("Rotate: bad axis {axis} or angle {max_degrees}");
                }
            }
            TransformStage::Noise { negate_probability, std_range } => {
                if !(0.0..=1.0).contains(negate_probability) {
                    bail!("Noise: negate probability {negate_probability} outside [0, 1]");
                }
                if std_range.0 < 0.0 || std_range.1 < std_range.0 {
                    bail!("Noise: bad std range {:?}", std_range);
                }
            }
            TransformStage::ToTensor => {}
        }
        if let TransformStage::RandomFlip { probability, .. } = self {
            if !(0.0..=1.0).contains(probability) {
                bail!("RandomFlip: probability {probability} outside [0, 1]");
            }
        }
        Ok(())
    }

    fn apply<R: Rng>(&self, vol: Volume, rng: &mut R) -> Result<Volume> {
        let Volume { data, spacing, layout } = vol;

        let vol = match self {
            TransformStage::Resize { shape } => {
                let old = [data.shape()[1], data.shape()[2], data.shape()[3]];
                let spacing = [
                    spacing[0] * old[0] as f32 / shape[0] as f32,
                    spacing[1] * old[1] as f32 / shape[1] as f32,
                    spacing[2] * old[2] as f32 / shape[2] as f32,
                ];
                Volume { data: geometry::resize(&data, *shape), spacing, layout }
            }
            TransformStage::Resample { spacing: target } => {
                let old   = [data.shape()[1], data.shape()[2], data.shape()[3]];
                let shape = geometry::resampled_shape(old, spacing, *target);
                Volume { data: geometry::resize(&data, shape), spacing: *target, layout }
            }
            TransformStage::Flip { axes } => {
                Volume { data: geometry::flip(data, axes), spacing, layout }
            }
            TransformStage::RandomFlip { axes, probability } => {
                Volume { data: geometry::random_flip(data, axes, *probability, rng), spacing, layout }
            }
            TransformStage::CropOrPad { shape, random_center, padding } => {
                let data = geometry::crop_or_pad(&data, *shape, *random_center, *padding, rng);
                Volume { data, spacing, layout }
            }
            TransformStage::Normalize { percentiles } => {
                Volume { data: intensity::z_normalize(data, *percentiles), spacing, layout }
            }
            TransformStage::Rotate { axis, max_degrees, padding } => {
                let degrees = if *max_degrees > 0.0 { rng.gen_range(0.0..=*max_degrees) } else { 0.0 };
                Volume { data: geometry::rotate(&data, *axis, degrees, *padding), spacing, layout }
            }
            TransformStage::Noise { negate_probability, std_range } => {
                let data = intensity::negate_and_noise(data, *negate_probability, *std_range, rng)?;
                Volume { data, spacing, layout }
            }
            TransformStage::ToTensor => match layout {
                AxisLayout::Canonical => Volume { data, spacing, layout },
                AxisLayout::Spatial   => Volume {
                    data:   geometry::to_canonical(data),
                    spacing,
                    layout: AxisLayout::Canonical,
                },
            },
        };
        Ok(vol)
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────
/// An ordered, validated list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<TransformStage>,
}

impl Pipeline {
    /// Validate and wrap a custom stage list. ToTensor, if present, must be last.
    pub fn new(stages: Vec<TransformStage>) -> Result<Self> {
        for stage in &stages {
            stage.validate()?;
        }
        if let Some(pos) = stages.iter().position(|s| *s == TransformStage::ToTensor) {
            if pos + 1 != stages.len() {
                bail!("ToTensor must be the last stage (found at position {pos})");
            }
        }
        Ok(Self { stages })
    }

    /// Build the standard pipeline from constructor switches.
    pub fn from_config(cfg: &TransformConfig) -> Result<Self> {
        let mut stages = Vec::new();

        if let Some(shape) = cfg.image_resize {
            stages.push(TransformStage::Resize { shape });
        }
        if let Some(spacing) = cfg.resample {
            stages.push(TransformStage::Resample { spacing });
        }
        if cfg.orientation_flip {
            stages.push(TransformStage::Flip { axes: vec![1] });
        }
        if let Some(shape) = cfg.image_crop {
            stages.push(TransformStage::CropOrPad {
                shape,
                random_center: cfg.random_center,
                padding:       cfg.padding,
            });
        }
        stages.push(TransformStage::Normalize { percentiles: cfg.norm_percentiles });
        if cfg.random_rotate {
            stages.push(TransformStage::Rotate {
                axis:        cfg.rotate_axis,
                max_degrees: cfg.rotate_max_degrees,
                padding:     cfg.padding,
            });
        }
        if cfg.flip {
            stages.push(TransformStage::RandomFlip { axes: vec![0, 1, 2], probability: 0.5 });
        }
        if cfg.noise {
            stages.push(TransformStage::Noise {
                negate_probability: cfg.negate_probability,
                std_range:          cfg.noise_std,
            });
        }
        if cfg.to_tensor {
            stages.push(TransformStage::ToTensor);
        }

        Self::new(stages)
    }

    pub fn stages(&self) -> &[TransformStage] {
        &self.stages
    }

    /// True when no stage draws randomness
    pub fn is_deterministic(&self) -> bool {
        !self.stages.iter().any(TransformStage::is_random)
    }

    /// Stage names joined in order, for logs
    pub fn describe(&self) -> String {
        if self.stages.is_empty() {
            return "Identity".to_string();
        }
        self.stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
    }

    /// Run every stage in order.
    pub fn apply<R: Rng>(&self, mut vol: Volume, rng: &mut R) -> Result<Volume> {
        for stage in &self.stages {
            vol = stage.apply(vol, rng)?;
        }
        Ok(vol)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rand::{rngs::StdRng, SeedableRng};

    fn scan() -> Volume {
        let data = Array4::from_shape_fn((1, 20, 18, 12), |(_, x, y, z)| {
            ((x * 31 + y * 17 + z * 7) % 97) as f32
        });
        Volume::new(data, [0.7, 0.7, 1.5])
    }

    fn small() -> TransformConfig {
        TransformConfig { image_crop: Some([16, 16, 8]), ..TransformConfig::default() }
    }

    #[test]
    fn test_default_stage_order() {
        let p = Pipeline::from_config(&TransformConfig::default()).unwrap();
        assert_eq!(p.describe(), "Flip -> CropOrPad -> Normalize -> ToTensor");
        assert!(p.is_deterministic());
    }

    #[test]
    fn test_all_switches_on() {
        let cfg = TransformConfig {
            image_resize:  Some([32, 32, 16]),
            resample:      Some([1.0, 1.0, 1.0]),
            flip:          true,
            random_rotate: true,
            noise:         true,
            ..small()
        };
        let p = Pipeline::from_config(&cfg).unwrap();
        assert_eq!(
            p.describe(),
            "Resize -> Resample -> Flip -> CropOrPad -> Normalize -> Rotate -> RandomFlip -> Noise -> ToTensor",
        );
        assert!(!p.is_deterministic());
    }

    #[test]
    fn test_output_shape_is_canonical_crop() {
        let p   = Pipeline::from_config(&small()).unwrap();
        let out = p.apply(scan(), &mut StdRng::seed_from_u64(0)).unwrap();
        // crop is (W, H, D) = (16, 16, 8); tensor layout is (C, D, H, W)
        assert_eq!(out.data.shape(), &[1, 8, 16, 16]);
        assert_eq!(out.layout, AxisLayout::Canonical);
    }

    #[test]
    fn test_without_tensor_conversion_layout_is_spatial() {
        let cfg = TransformConfig { to_tensor: false, ..small() };
        let out = Pipeline::from_config(&cfg).unwrap().apply(scan(), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(out.data.shape(), &[1, 16, 16, 8]);
        assert_eq!(out.layout, AxisLayout::Spatial);
    }

    #[test]
    fn test_deterministic_pipeline_repeats() {
        let p = Pipeline::from_config(&small()).unwrap();
        let a = p.apply(scan(), &mut StdRng::seed_from_u64(1)).unwrap();
        let b = p.apply(scan(), &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_augmentation_varies_between_calls() {
        let cfg = TransformConfig { flip: true, random_rotate: true, noise: true, random_center: true, ..small() };
        let p   = Pipeline::from_config(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let a = p.apply(scan(), &mut rng).unwrap();
        let b = p.apply(scan(), &mut rng).unwrap();
        assert_eq!(a.data.shape(), b.data.shape());
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic_variant_strips_augmentation() {
        let cfg = TransformConfig { flip: true, random_rotate: true, noise: true, random_center: true, ..small() };
        assert!(Pipeline::from_config(&cfg.deterministic()).unwrap().is_deterministic());
    }

    #[test]
    fn test_resample_updates_spacing() {
        let p = Pipeline::new(vec![TransformStage::Resample { spacing: [1.4, 1.4, 3.0] }]).unwrap();
        let out = p.apply(scan(), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(out.data.shape(), &[1, 10, 9, 6]);
        assert_eq!(out.spacing, [1.4, 1.4, 3.0]);
    }

    #[test]
    fn test_to_tensor_must_be_last() {
        let err = Pipeline::new(vec![
            TransformStage::ToTensor,
            TransformStage::Normalize { percentiles: (0.5, 99.5) },
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let bad = TransformConfig { image_crop: Some([0, 16, 8]), ..TransformConfig::default() };
        assert!(Pipeline::from_config(&bad).is_err());
        let bad = TransformConfig { norm_percentiles: (99.0, 1.0), ..TransformConfig::default() };
        assert!(Pipeline::from_config(&bad).is_err());
        let bad = TransformConfig { noise: true, negate_probability: 2.0, ..TransformConfig::default() };
        assert!(Pipeline::from_config(&bad).is_err());
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let p = Pipeline::default();
        assert_eq!(p.describe(), "Identity");
        assert_eq!(p.apply(scan(), &mut StdRng::seed_from_u64(0)).unwrap(), scan());
    }
}
