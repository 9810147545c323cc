// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the subcommands `train`, `evaluate` and `inspect` and
// all their flags.
//
// Shapes are given as comma-separated W,H,D (e.g. 224,224,32).
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::data::{
    dataset::DatasetConfig,
    transforms::{PaddingMode, TransformConfig},
};
use crate::domain::split::Split;
use crate::ml::{
    classifier::{BasicModel, ClassifierConfig, LossConfig},
    optim::{LrSchedule, OptimizerConfig, OptimizerKind},
    trainer::{Monitor, TrainerConfig},
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the classifier on one fold
    Train(TrainArgs),

    /// Score the best checkpoint of a finished run
    Evaluate(EvaluateArgs),

    /// Load one sample through the pipeline and print its statistics
    Inspect(InspectArgs),
}

/// Parse "W,H,D" into three sizes.
pub fn parse_shape(s: &str) -> Result<[usize; 3], String> {
    let dims: Vec<usize> = s
        .split(',')
        .map(|d| d.trim().parse::<usize>().map_err(|e| format!("'{d}': {e}")))
        .collect::<Result<_, _>>()?;
    match dims.as_slice() {
        &[w, h, d] if w > 0 && h > 0 && d > 0 => Ok([w, h, d]),
        _ => Err(format!("expected three positive sizes W,H,D, got '{s}'")),
    }
}

/// Parse "LOW,HIGH" into a noise standard-deviation range.
pub fn parse_std_range(s: &str) -> Result<(f32, f32), String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|d| d.trim().parse::<f32>().map_err(|e| format!("'{d}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        &[lo, hi] if 0.0 <= lo && lo <= hi => Ok((lo, hi)),
        _ => Err(format!("expected LOW,HIGH with 0 <= LOW <= HIGH, got '{s}'")),
    }
}

/// Parse "X,Y,Z" into a voxel spacing in mm.
pub fn parse_spacing(s: &str) -> Result<[f32; 3], String> {
    let dims: Vec<f32> = s
        .split(',')
        .map(|d| d.trim().parse::<f32>().map_err(|e| format!("'{d}': {e}")))
        .collect::<Result<_, _>>()?;
    match dims.as_slice() {
        &[x, y, z] if x > 0.0 && y > 0.0 && z > 0.0 => Ok([x, y, z]),
        _ => Err(format!("expected three positive spacings X,Y,Z, got '{s}'")),
    }
}

// ─── Shared data arguments ────────────────────────────────────────────────────
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Dataset root holding preprocessed_crop/{data,splits}
    #[arg(long, default_value = "data/Duke-Breast-Cancer-MRI")]
    pub path_root: PathBuf,

    /// Split manifest CSV (default: <root>/preprocessed_crop/splits/split.csv)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Subject directories (default: <root>/preprocessed_crop/data)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Cross-validation fold to use
    #[arg(long, default_value_t = 0)]
    pub fold: i64,

    /// Keep only this share of each split (seeded)
    #[arg(long)]
    pub fraction: Option<f64>,

    /// Crop or pad every volume to W,H,D
    #[arg(long, value_parser = parse_shape, default_value = "224,224,32")]
    pub crop: [usize; 3],

    /// Skip the crop/pad stage
    #[arg(long)]
    pub no_crop: bool,

    /// Resize to W,H,D before anything else
    #[arg(long, value_parser = parse_shape)]
    pub resize: Option<[usize; 3]>,

    /// Resample to this voxel spacing (mm), X,Y,Z
    #[arg(long, value_parser = parse_spacing)]
    pub resample: Option<[f32; 3]>,

    /// Fill policy for padding: zero or minimum
    #[arg(long, default_value = "minimum")]
    pub padding: PaddingMode,

    /// Keep the stored orientation (skip the axis-Y flip)
    #[arg(long)]
    pub no_orientation_flip: bool,

    /// Keep (C, W, H, D) instead of converting to (C, D, H, W)
    #[arg(long)]
    pub no_to_tensor: bool,
}

impl DataArgs {
    fn dataset_config(&self) -> DatasetConfig {
        DatasetConfig {
            path_root: self.path_root.clone(),
            manifest:  self.manifest.clone(),
            data_dir:  self.data_dir.clone(),
            fold:      self.fold,
            fraction:  self.fraction,
        }
    }

    fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            image_resize:     self.resize,
            resample:         self.resample,
            image_crop:       if self.no_crop { None } else { Some(self.crop) },
            padding:          self.padding,
            orientation_flip: !self.no_orientation_flip,
            to_tensor:        !self.no_to_tensor,
            ..TransformConfig::default()
        }
    }
}

// ─── Augmentation arguments ───────────────────────────────────────────────────
#[derive(Args, Debug, Clone)]
pub struct AugmentArgs {
    /// Shorthand for --flip --random-center --random-rotate --noise
    #[arg(long)]
    pub augment: bool,

    /// Random mirror along each spatial axis
    #[arg(long)]
    pub flip: bool,

    /// Random instead of centered crop/pad offset
    #[arg(long)]
    pub random_center: bool,

    /// Random rotation about the Z axis
    #[arg(long)]
    pub random_rotate: bool,

    /// Upper bound of the rotation angle in degrees
    #[arg(long, default_value_t = 90.0)]
    pub rotate_max_degrees: f32,

    /// Random negation plus additive Gaussian noise
    #[arg(long)]
    pub noise: bool,

    /// Noise standard deviation range, LOW,HIGH
    #[arg(long, value_parser = parse_std_range, default_value = "0,0.25")]
    pub noise_std: (f32, f32),
}

impl AugmentArgs {
    fn apply(&self, cfg: &mut TransformConfig) {
        cfg.flip               = self.augment || self.flip;
        cfg.random_center      = self.augment || self.random_center;
        cfg.random_rotate      = self.augment || self.random_rotate;
        cfg.noise              = self.augment || self.noise;
        cfg.rotate_max_degrees = self.rotate_max_degrees;
        cfg.noise_std          = self.noise_std;
    }
}

// ─── train ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub augment: AugmentArgs,

    /// Directory for checkpoints, config and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,

    /// Background loader threads (0 = load on the training thread)
    #[arg(long, default_value_t = 0)]
    pub num_workers: usize,

    /// Seed for shuffling and for per-sample augmentation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// adam or adamw
    #[arg(long, default_value = "adamw")]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 1e-2)]
    pub weight_decay: f32,

    /// constant, step:<size>:<gamma> or cosine:<t_max>[:<eta_min>]
    #[arg(long)]
    pub lr_schedule: Option<LrSchedule>,

    #[arg(long)]
    pub label_smoothing: Option<f32>,

    /// Input channels of the volumes
    #[arg(long, default_value_t = 1)]
    pub in_ch: usize,

    /// Number of classes
    #[arg(long, default_value_t = 2)]
    pub out_ch: usize,

    /// Dropout before the classification head
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    /// val/AUC_ROC (maximised) or val/loss (minimised)
    #[arg(long, default_value = "val/AUC_ROC")]
    pub monitor: Monitor,

    /// Checkpoint file or directory to initialise from
    #[arg(long)]
    pub pretrained: Option<PathBuf>,

    /// Evaluate the best checkpoint on the test split afterwards
    #[arg(long)]
    pub test: bool,

    /// cpu or wgpu
    #[arg(long, default_value = "cpu")]
    pub device: DeviceKind,
}

/// Boundary between Layer 1 and Layer 2: the application layer
/// never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        let mut transforms = a.data.transform_config();
        a.augment.apply(&mut transforms);

        let optimizer = OptimizerConfig { kind: a.optimizer, lr: a.lr, weight_decay: a.weight_decay };

        TrainConfig {
            dataset:        a.data.dataset_config(),
            transforms,
            classifier:     ClassifierConfig {
                in_ch:  a.in_ch,
                out_ch: a.out_ch,
                loss:   LossConfig { label_smoothing: a.label_smoothing, class_weights: None },
                optim:  BasicModel { optimizer, lr_scheduler: a.lr_schedule },
                ..ClassifierConfig::default()
            },
            trainer:        TrainerConfig {
                epochs:      a.epochs,
                batch_size:  a.batch_size,
                num_workers: a.num_workers,
                seed:        a.seed,
                monitor:     a.monitor,
            },
            dropout:        a.dropout,
            checkpoint_dir: a.checkpoint_dir,
            pretrained:     a.pretrained,
            run_test:       a.test,
            device:         a.device,
        }
    }
}

// ─── evaluate ─────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Directory written by `train`
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// train, val or test
    #[arg(long, default_value = "test")]
    pub split: Split,

    /// Override the dataset root saved with the run
    #[arg(long)]
    pub path_root: Option<PathBuf>,

    /// cpu or wgpu
    #[arg(long, default_value = "cpu")]
    pub device: DeviceKind,
}

// ─── inspect ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Only rows of this split (train, val or test)
    #[arg(long)]
    pub split: Option<Split>,

    /// Sample index within the filtered rows
    #[arg(long, default_value_t = 0)]
    pub index: usize,

    #[command(flatten)]
    pub augment: AugmentArgs,
}

impl InspectArgs {
    pub fn transform_config(&self) -> TransformConfig {
        let mut cfg = self.data.transform_config();
        self.augment.apply(&mut cfg);
        cfg
    }

    pub fn dataset_config(&self) -> DatasetConfig {
        self.data.dataset_config()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("224,224,32"), Ok([224, 224, 32]));
        assert_eq!(parse_shape(" 8, 8 ,4"), Ok([8, 8, 4]));
        assert!(parse_shape("224,224").is_err());
        assert!(parse_shape("0,1,1").is_err());
        assert!(parse_shape("a,b,c").is_err());
    }

    #[test]
    fn test_train_args_defaults_match_config() {
        let cli = Cli::try_parse_from(["duke-mri", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();

        let default = TrainConfig::default();
        assert_eq!(cfg.dataset, default.dataset);
        assert_eq!(cfg.transforms, default.transforms);
        assert_eq!(cfg.classifier, default.classifier);
        assert_eq!(cfg.trainer, default.trainer);
        assert_eq!(cfg, default);
    }

    #[test]
    fn test_train_args_overrides() {
        let cli = Cli::try_parse_from([
            "duke-mri", "train",
            "--fold", "2", "--crop", "64,64,16", "--augment",
            "--optimizer", "adam", "--lr-schedule", "cosine:100",
            "--monitor", "val/loss", "--device", "wgpu", "--test",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();

        assert_eq!(cfg.dataset.fold, 2);
        assert_eq!(cfg.transforms.image_crop, Some([64, 64, 16]));
        assert!(cfg.transforms.noise && cfg.transforms.random_rotate);
        assert_eq!(cfg.classifier.optim.optimizer.kind, OptimizerKind::Adam);
        assert_eq!(cfg.classifier.optim.lr_scheduler, Some(LrSchedule::Cosine { t_max: 100, eta_min: 0.0 }));
        assert_eq!(cfg.trainer.monitor, Monitor::ValLoss);
        assert_eq!(cfg.device, DeviceKind::Wgpu);
        assert!(cfg.run_test);
    }

    #[test]
    fn test_individual_transform_flags() {
        let cli = Cli::try_parse_from([
            "duke-mri", "train",
            "--random-rotate", "--rotate-max-degrees", "15",
            "--noise", "--noise-std", "0.1,0.3",
            "--no-orientation-flip", "--no-to-tensor",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();

        assert!(cfg.transforms.random_rotate && cfg.transforms.noise);
        assert!(!cfg.transforms.flip && !cfg.transforms.random_center);
        assert_eq!(cfg.transforms.rotate_max_degrees, 15.0);
        assert_eq!(cfg.transforms.noise_std, (0.1, 0.3));
        assert!(!cfg.transforms.orientation_flip);
        assert!(!cfg.transforms.to_tensor);

        assert!(parse_std_range("0.3,0.1").is_err());
        assert!(parse_std_range("0.2").is_err());
    }

    #[test]
    fn test_inspect_augment_shorthand() {
        let cli = Cli::try_parse_from(["duke-mri", "inspect", "--augment", "--index", "3"]).unwrap();
        let Commands::Inspect(args) = cli.command else { panic!("expected inspect") };
        let cfg = args.transform_config();
        assert!(cfg.flip && cfg.random_center && cfg.random_rotate && cfg.noise);
        assert!(cfg.orientation_flip && cfg.to_tensor);
        assert_eq!(args.index, 3);
    }

    #[test]
    fn test_evaluate_args() {
        let cli = Cli::try_parse_from(["duke-mri", "evaluate", "--split", "val"]).unwrap();
        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        assert_eq!(args.split, Split::Val);
        assert_eq!(args.checkpoint_dir, PathBuf::from("checkpoints"));
    }
}
