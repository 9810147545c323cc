// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores named parameter tensors as safetensors files.
//
// File layout:
//   checkpoints/
//     epoch=1.safetensors     ← parameters after epoch 1
//     epoch=2.safetensors
//     ...
//     best_checkpoint.json    ← {"best_model_epoch": "epoch=2.safetensors"}
//     train_config.json       ← full TrainConfig, to rebuild the model
//     metrics.csv
//
// The pointer holds a file name relative to its directory, so a
// checkpoint directory can be moved as a whole.
//
// Pretrained loading overlays a (filtered) state dict onto the
// model's own:
//
//   pretrained ──filter──► kept ──strict?──► unexpected keys rejected
//                            │
//   own state ◄── overlay ───┘   (shape mismatches always rejected)

use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::TensorData;
use safetensors::{serialize_to_file, tensor::TensorView, Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::ModelError;
use crate::ml::model::StateDict;

pub const BEST_POINTER_FILE: &str = "best_checkpoint.json";
pub const CONFIG_FILE:       &str = "train_config.json";

#[derive(Debug, Serialize, Deserialize)]
struct BestCheckpoint {
    best_model_epoch: String,
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
/// Owns one checkpoint directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Attach to an existing directory without creating it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            bail!("Checkpoint directory '{}' does not exist. Have you run 'train' first?", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("epoch={epoch}.safetensors"))
    }

    /// Write the parameters after `epoch` and return the file path.
    pub fn save_epoch(&self, state: &StateDict, epoch: usize) -> Result<PathBuf> {
        let path = self.epoch_path(epoch);
        save_state_dict(&path, state)?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(path)
    }

    pub fn save_best(&self, best_model_path: &Path) -> Result<()> {
        save_best_checkpoint(&self.dir, best_model_path)
    }

    pub fn best_path(&self) -> Result<PathBuf> {
        best_checkpoint_path(&self.dir)
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' first.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config '{}'", path.display()))
    }
}

// ─── Best-checkpoint pointer ──────────────────────────────────────────────────
/// Record `best_model_path` as the best artifact of `dir`.
pub fn save_best_checkpoint(dir: &Path, best_model_path: &Path) -> Result<()> {
    let name = best_model_path
        .file_name()
        .ok_or_else(|| anyhow!("'{}' has no file name", best_model_path.display()))?
        .to_string_lossy()
        .into_owned();

    let path = dir.join(BEST_POINTER_FILE);
    let json = serde_json::to_string(&BestCheckpoint { best_model_epoch: name })?;
    fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}

/// Resolve the pointer file of `dir` to the artifact it names.
pub fn best_checkpoint_path(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(BEST_POINTER_FILE);
    let json = fs::read_to_string(&path).with_context(|| {
        format!("Cannot find '{}'. Have you run 'train' first?", path.display())
    })?;
    let pointer: BestCheckpoint = serde_json::from_str(&json)
        .with_context(|| format!("Malformed pointer file '{}'", path.display()))?;
    Ok(dir.join(pointer.best_model_epoch))
}

/// A directory means "its best checkpoint"; anything else is used as is.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        best_checkpoint_path(path)
    } else {
        Ok(path.to_path_buf())
    }
}

// ─── State-dict files ─────────────────────────────────────────────────────────
pub fn save_state_dict(path: &Path, state: &StateDict) -> Result<()> {
    let mut buffers: Vec<(&str, Vec<usize>, Vec<u8>)> = Vec::with_capacity(state.len());
    for (name, data) in state {
        let values = data
            .clone()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Cannot read tensor '{name}': {e:?}"))?;
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name.as_str(), data.shape.clone(), bytes));
    }

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| Ok((*name, TensorView::new(Dtype::F32, shape.clone(), bytes)?)))
        .collect::<Result<Vec<_>>>()?;

    serialize_to_file(views, &None, path)
        .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
    Ok(())
}

pub fn load_state_dict(path: &Path) -> Result<StateDict> {
    let buffer = fs::read(path)
        .with_context(|| format!("Cannot read checkpoint '{}'", path.display()))?;
    let tensors = SafeTensors::deserialize(&buffer)
        .with_context(|| format!("Malformed checkpoint '{}'", path.display()))?;

    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            bail!("Tensor '{name}' in '{}' has dtype {:?}, expected F32", path.display(), view.dtype());
        }
        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        state.insert(name, TensorData::new(values, view.shape().to_vec()));
    }
    Ok(state)
}

// ─── Pretrained overlay ───────────────────────────────────────────────────────
pub type KeyFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// How pretrained tensors are matched against the model.
pub struct LoadOptions {
    /// Reject keys the model does not own (after filtering)
    pub strict: bool,
    /// Keys to take from the pretrained state; default: the model's own keys
    pub filter: Option<KeyFilter>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { strict: true, filter: None }
    }
}

impl LoadOptions {
    pub fn non_strict() -> Self {
        Self { strict: false, filter: None }
    }

    pub fn with_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// Overlay the selected pretrained tensors onto `own`.
pub fn merge_state(mut own: StateDict, pretrained: StateDict, opts: &LoadOptions) -> Result<StateDict> {
    let kept: Vec<(String, TensorData)> = pretrained
        .into_iter()
        .filter(|(key, _)| match &opts.filter {
            Some(f) => f(key),
            None    => own.contains_key(key),
        })
        .collect();

    let unexpected: Vec<String> = kept
        .iter()
        .filter(|(key, _)| !own.contains_key(key))
        .map(|(key, _)| key.clone())
        .collect();
    if !unexpected.is_empty() {
        if opts.strict {
            return Err(ModelError::UnexpectedKeys(unexpected).into());
        }
        tracing::warn!("Ignoring {} unexpected keys: {:?}", unexpected.len(), unexpected);
    }

    let mut loaded = 0usize;
    for (key, data) in kept {
        let Some(current) = own.get(&key) else { continue };
        if current.shape != data.shape {
            return Err(ModelError::ShapeMismatch {
                expected: current.shape.clone(),
                actual:   data.shape.clone(),
                key,
            }
            .into());
        }
        own.insert(key, data);
        loaded += 1;
    }
    tracing::info!("Loaded {} of {} parameter tensors", loaded, own.len());
    Ok(own)
}
