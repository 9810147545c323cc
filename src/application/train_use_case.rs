// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Build train / val datasets      (Layer 4 - data)
//   Step 2: Save config                     (Layer 6 - infra)
//   Step 3: Build network + classifier      (Layer 5 - ml)
//   Step 4: Load pretrained weights         (Layer 6 - infra)
//   Step 5: Run training loop               (Layer 5 - ml)
//   Step 6: Test the best checkpoint        (Layer 5 - ml)
//
// Validation always uses the deterministic form of the transform
// settings (no random flips, rotations, noise or crop offsets).

use anyhow::{bail, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

use crate::data::{dataset::{DatasetConfig, VolumeDataset}, transforms::TransformConfig};
use crate::domain::split::Split;
use crate::infra::{
    checkpoint::{CheckpointManager, LoadOptions},
    metrics::MetricsLogger,
};
use crate::ml::{
    classifier::{BasicClassifier, ClassifierConfig},
    model::PooledLinearConfig,
    trainer::{evaluate, fit, inner_device, EvalSummary, FitSummary, TrainerConfig},
};

// ─── Device selection ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NdArray backend
    #[default]
    Cpu,
    /// WGPU backend (GPU when available)
    Wgpu,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "ndarray" => Ok(DeviceKind::Cpu),
            "wgpu" | "gpu"    => Ok(DeviceKind::Wgpu),
            other => Err(format!("unknown device '{other}' (expected cpu or wgpu)")),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu  => f.write_str("cpu"),
            DeviceKind::Wgpu => f.write_str("wgpu"),
        }
    }
}

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything needed to reproduce a run. Saved as train_config.json
// next to the checkpoints and reloaded by `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub dataset:        DatasetConfig,
    /// Training-split transforms; validation/test use the deterministic form
    pub transforms:     TransformConfig,
    pub classifier:     ClassifierConfig,
    pub trainer:        TrainerConfig,
    /// Dropout before the reference network's linear head
    pub dropout:        f64,
    pub checkpoint_dir: PathBuf,
    /// Checkpoint file or directory to start from (non-strict)
    pub pretrained:     Option<PathBuf>,
    /// Evaluate the best checkpoint on the test split afterwards
    pub run_test:       bool,
    pub device:         DeviceKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset:        DatasetConfig::default(),
            transforms:     TransformConfig::default(),
            classifier:     ClassifierConfig::default(),
            trainer:        TrainerConfig::default(),
            dropout:        0.0,
            checkpoint_dir: PathBuf::from("checkpoints"),
            pretrained:     None,
            run_test:       false,
            device:         DeviceKind::Cpu,
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub fit:  FitSummary,
    pub test: Option<EvalSummary>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline on the configured device
    pub fn execute(&self) -> Result<TrainReport> {
        tracing::info!("Training on device: {}", self.config.device);
        match self.config.device {
            DeviceKind::Cpu  => self.run::<Autodiff<NdArray>>(NdArrayDevice::default()),
            DeviceKind::Wgpu => self.run::<Autodiff<Wgpu>>(WgpuDevice::default()),
        }
    }

    fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<TrainReport> {
        let cfg = &self.config;
        if cfg.classifier.in_ch == 0 {
            bail!("in_ch must be at least 1");
        }

        // ── Step 1: Datasets ──────────────────────────────────────────────────
        let eval_transforms = cfg.transforms.deterministic();
        let train = VolumeDataset::new(&cfg.dataset, Some(Split::Train), &cfg.transforms)?;
        let val   = VolumeDataset::new(&cfg.dataset, Some(Split::Val), &eval_transforms)?;
        let (benign, malignant) = train.class_counts();
        tracing::info!(
            "Fold {}: {} train ({} benign / {} malignant), {} val",
            cfg.dataset.fold, train.rows().len(), benign, malignant, val.rows().len(),
        );

        // ── Step 2: Save config ───────────────────────────────────────────────
        let ckpt   = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let logger = MetricsLogger::new(&cfg.checkpoint_dir)?;
        ckpt.save_config(cfg)?;

        // ── Step 3: Network + classifier ──────────────────────────────────────
        let net = PooledLinearConfig::new(cfg.classifier.in_ch, cfg.classifier.out_ch)
            .with_dropout(cfg.dropout)
            .init::<B>(&device);
        let mut classifier = BasicClassifier::new(net, cfg.classifier.clone(), &device)?;

        // ── Step 4: Pretrained weights ────────────────────────────────────────
        if let Some(path) = &cfg.pretrained {
            classifier.load_pretrained(path, &LoadOptions::non_strict())?;
        }

        // ── Step 5: Training loop ─────────────────────────────────────────────
        let fit_summary = fit(&mut classifier, train, val, &cfg.trainer, &ckpt, &logger, &device)?;

        // ── Step 6: Test ──────────────────────────────────────────────────────
        let test = if cfg.run_test {
            let dataset = VolumeDataset::new(&cfg.dataset, Some(Split::Test), &eval_transforms)?;
            classifier.load_best_checkpoint(ckpt.dir())?;

            let mut inner = classifier.valid()?;
            let eval_device = inner_device::<B>(&device);
            let summary = evaluate(
                &mut inner, dataset, Split::Test,
                cfg.trainer.batch_size, cfg.trainer.num_workers, &eval_device,
            );
            classifier.absorb(inner);
            let summary = summary?;
            logger.log(&classifier.log_mut().drain())?;
            Some(summary)
        } else {
            None
        };

        Ok(TrainReport { fit: fit_summary, test })
    }
}
