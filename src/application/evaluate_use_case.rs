// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Restores a finished run and scores one split:
//
//   Step 1: Read train_config.json         (Layer 6 - infra)
//   Step 2: Build the split's dataset      (Layer 4 - data)
//   Step 3: Rebuild network, load best     (Layer 5 / 6)
//   Step 4: One pass, no gradients         (Layer 5 - ml)
//
// Uses the plain (non-autodiff) backend.

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::Backend,
};
use std::path::PathBuf;

use crate::application::train_use_case::DeviceKind;
use crate::data::dataset::VolumeDataset;
use crate::domain::split::Split;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    classifier::BasicClassifier,
    model::PooledLinearConfig,
    trainer::{evaluate, EvalSummary},
};

pub struct EvaluateUseCase {
    checkpoint_dir: PathBuf,
    split:          Split,
    device:         DeviceKind,
    /// Replaces the dataset root saved with the run
    path_root:      Option<PathBuf>,
}

impl EvaluateUseCase {
    pub fn new(checkpoint_dir: PathBuf, split: Split, device: DeviceKind, path_root: Option<PathBuf>) -> Self {
        Self { checkpoint_dir, split, device, path_root }
    }

    pub fn execute(&self) -> Result<EvalSummary> {
        match self.device {
            DeviceKind::Cpu  => self.run::<NdArray>(NdArrayDevice::default()),
            DeviceKind::Wgpu => self.run::<Wgpu>(WgpuDevice::default()),
        }
    }

    fn run<B: Backend>(&self, device: B::Device) -> Result<EvalSummary> {
        // ── Step 1: Saved configuration ───────────────────────────────────────
        let ckpt    = CheckpointManager::open(&self.checkpoint_dir)?;
        let mut cfg = ckpt.load_config()?;
        if let Some(root) = &self.path_root {
            cfg.dataset.path_root = root.clone();
        }

        // ── Step 2: Dataset ───────────────────────────────────────────────────
        let dataset = VolumeDataset::new(&cfg.dataset, Some(self.split), &cfg.transforms.deterministic())?;

        // ── Step 3: Network + best weights ────────────────────────────────────
        let net = PooledLinearConfig::new(cfg.classifier.in_ch, cfg.classifier.out_ch)
            .with_dropout(cfg.dropout)
            .init::<B>(&device);
        let mut classifier = BasicClassifier::new(net, cfg.classifier.clone(), &device)?;
        classifier.load_best_checkpoint(ckpt.dir())?;

        // ── Step 4: Evaluate ──────────────────────────────────────────────────
        evaluate(
            &mut classifier, dataset, self.split,
            cfg.trainer.batch_size, cfg.trainer.num_workers, &device,
        )
    }
}
