// ============================================================
// Layer 5 — Training Wrapper
// ============================================================
// Three levels, each adding to the one before:
//
//   VeryBasicModel   step/epoch hooks. training_step, validation_step
//                    and test_step advance their split's counter and
//                    call step(); on_*_epoch_end call epoch_end().
//                    forward() and step() must be provided.
//
//   BasicModel       optimizer + optional LR schedule settings and
//                    configure_optimizers().
//
//   BasicClassifier  cross-entropy loss, per-split Accuracy/AUROC,
//                    scalar logging, checkpoint loading. Wraps any
//                    VolumeNet.
//
// Logged names:
//   {split}/loss_step   per step
//   {split}/loss        epoch mean, weighted by batch size
//   {split}/ACC         at epoch end
//   {split}/AUC_ROC     at epoch end

use anyhow::{anyhow, bail, Result};
use burn::{
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::batcher::VolumeBatch;
use crate::domain::{
    error::ModelError,
    split::{PerSplit, Split},
};
use crate::infra::checkpoint::{self, LoadOptions};
use crate::infra::metrics::MetricLog;
use crate::ml::metrics::ClassificationMetrics;
use crate::ml::model::{StateDict, VolumeNet};
use crate::ml::optim::{LrSchedule, OptimizerConfig, OptimizerSetup, SchedulerSetup};

// ─── StepCounters ─────────────────────────────────────────────────────────────
/// Per-split step index. Starts at -1 so the first step is 0; never reset.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCounters(PerSplit<i64>);

impl Default for StepCounters {
    fn default() -> Self {
        Self(PerSplit { train: -1, val: -1, test: -1 })
    }
}

impl StepCounters {
    /// Move `split` forward and return its new index.
    pub fn advance(&mut self, split: Split) -> i64 {
        let counter = self.0.get_mut(split);
        *counter += 1;
        *counter
    }

    pub fn current(&self, split: Split) -> i64 {
        *self.0.get(split)
    }
}

// ─── VeryBasicModel ───────────────────────────────────────────────────────────
pub trait VeryBasicModel<B: Backend> {
    fn counters_mut(&mut self) -> &mut StepCounters;

    fn forward(&self, _source: Tensor<B, 5>) -> Result<Tensor<B, 2>> {
        Err(ModelError::NotImplemented("forward").into())
    }

    /// Shared body of the three step hooks; returns the loss.
    fn step(
        &mut self,
        _batch:     &VolumeBatch<B>,
        _batch_idx: usize,
        _split:     Split,
        _step:      i64,
    ) -> Result<Tensor<B, 1>> {
        Err(ModelError::NotImplemented("step").into())
    }

    fn epoch_end(&mut self, _split: Split) -> Result<()> {
        Ok(())
    }

    fn training_step(&mut self, batch: &VolumeBatch<B>, batch_idx: usize) -> Result<Tensor<B, 1>> {
        let step = self.counters_mut().advance(Split::Train);
        self.step(batch, batch_idx, Split::Train, step)
    }

    fn validation_step(&mut self, batch: &VolumeBatch<B>, batch_idx: usize) -> Result<Tensor<B, 1>> {
        let step = self.counters_mut().advance(Split::Val);
        self.step(batch, batch_idx, Split::Val, step)
    }

    fn test_step(&mut self, batch: &VolumeBatch<B>, batch_idx: usize) -> Result<Tensor<B, 1>> {
        let step = self.counters_mut().advance(Split::Test);
        self.step(batch, batch_idx, Split::Test, step)
    }

    fn on_train_epoch_end(&mut self) -> Result<()> {
        self.epoch_end(Split::Train)
    }

    fn on_validation_epoch_end(&mut self) -> Result<()> {
        self.epoch_end(Split::Val)
    }

    fn on_test_epoch_end(&mut self) -> Result<()> {
        self.epoch_end(Split::Test)
    }
}

// ─── BasicModel ───────────────────────────────────────────────────────────────
/// Optimizer settings plus an optional per-step LR schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicModel {
    pub optimizer:    OptimizerConfig,
    pub lr_scheduler: Option<LrSchedule>,
}

impl Default for BasicModel {
    fn default() -> Self {
        Self { optimizer: OptimizerConfig::adam(1e-3, 1e-2), lr_scheduler: None }
    }
}

impl BasicModel {
    pub fn configure_optimizers(&self) -> OptimizerSetup {
        OptimizerSetup {
            optimizer: self.optimizer.clone(),
            scheduler: self.lr_scheduler.clone().map(SchedulerSetup::per_step),
        }
    }
}

// ─── ClassifierConfig ─────────────────────────────────────────────────────────
/// Cross-entropy options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub label_smoothing: Option<f32>,
    pub class_weights:   Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub in_ch:        usize,
    pub out_ch:       usize,
    pub spatial_dims: usize,
    pub loss:         LossConfig,
    pub optim:        BasicModel,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            in_ch:        1,
            out_ch:       2,
            spatial_dims: 3,
            loss:         LossConfig::default(),
            optim:        BasicModel {
                optimizer:    OptimizerConfig::adamw(1e-4, 1e-2),
                lr_scheduler: None,
            },
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.out_ch < 2 {
            bail!("out_ch must be at least 2, got {}", self.out_ch);
        }
        if self.spatial_dims != 3 {
            bail!("only 3 spatial dimensions are supported, got {}", self.spatial_dims);
        }
        if let Some(s) = self.loss.label_smoothing {
            if !(0.0..=1.0).contains(&s) {
                bail!("label smoothing must lie in [0, 1], got {s}");
            }
        }
        if let Some(w) = &self.loss.class_weights {
            if w.len() != self.out_ch {
                bail!("{} class weights given for {} classes", w.len(), self.out_ch);
            }
        }
        Ok(())
    }
}

// ─── BasicClassifier ──────────────────────────────────────────────────────────
pub struct BasicClassifier<B: Backend, N: VolumeNet<B>> {
    net:      N,
    config:   ClassifierConfig,
    loss:     CrossEntropyLoss<B>,
    counters: StepCounters,
    metrics:  PerSplit<ClassificationMetrics>,
    log:      MetricLog,
    device:   B::Device,
}

impl<B: Backend, N: VolumeNet<B>> BasicClassifier<B, N> {
    pub fn new(net: N, config: ClassifierConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let loss = CrossEntropyLossConfig::new()
            .with_smoothing(config.loss.label_smoothing)
            .with_weights(config.loss.class_weights.clone())
            .init(device);
        let metrics = PerSplit::from_fn(|_| ClassificationMetrics::new(config.out_ch));

        Ok(Self {
            net,
            config,
            loss,
            counters: StepCounters::default(),
            metrics,
            log:      MetricLog::new(),
            device:   device.clone(),
        })
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn set_net(&mut self, net: N) {
        self.net = net;
    }

    pub fn into_net(self) -> N {
        self.net
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn counters(&self) -> &StepCounters {
        &self.counters
    }

    pub fn metrics(&self, split: Split) -> &ClassificationMetrics {
        self.metrics.get(split)
    }

    pub fn log(&self) -> &MetricLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MetricLog {
        &mut self.log
    }

    pub fn configure_optimizers(&self) -> OptimizerSetup {
        self.config.optim.configure_optimizers()
    }

    // ── Checkpoint loading ────────────────────────────────────────────────────

    pub fn state_dict(&self) -> StateDict {
        self.net.state_dict()
    }

    /// Overlay `pretrained` onto the current parameters.
    pub fn load_weights(&mut self, pretrained: StateDict, opts: &LoadOptions) -> Result<()> {
        let merged = checkpoint::merge_state(self.net.state_dict(), pretrained, opts)?;
        self.net = self.net.clone().load_state_dict(&merged, &self.device)?;
        Ok(())
    }

    /// `path` may be an artifact or a directory holding a best-checkpoint pointer.
    pub fn load_pretrained(&mut self, path: &Path, opts: &LoadOptions) -> Result<()> {
        let file = checkpoint::resolve_checkpoint(path)?;
        tracing::info!("Loading weights from '{}'", file.display());
        let state = checkpoint::load_state_dict(&file)?;
        self.load_weights(state, opts)
    }

    /// Strictly load the best artifact recorded in `dir`.
    pub fn load_best_checkpoint(&mut self, dir: &Path) -> Result<()> {
        let file = checkpoint::best_checkpoint_path(dir)?;
        self.load_pretrained(&file, &LoadOptions::default())
    }
}

// ── Validation copy ───────────────────────────────────────────────────────────
// Evaluation runs on the inner backend with dropout off. The wrapper
// state (counters, accumulators, log) travels to the inner copy and
// comes back with absorb().

impl<B, N> BasicClassifier<B, N>
where
    B: AutodiffBackend,
    N: VolumeNet<B> + AutodiffModule<B>,
    N::InnerModule: VolumeNet<B::InnerBackend>,
{
    pub fn valid(&mut self) -> Result<BasicClassifier<B::InnerBackend, N::InnerModule>> {
        let device = Tensor::<B, 1>::zeros([1], &self.device).inner().device();

        let mut inner = BasicClassifier::new(self.net.valid(), self.config.clone(), &device)?;
        inner.counters = self.counters.clone();
        inner.metrics  = self.metrics.clone();
        inner.log      = std::mem::take(&mut self.log);
        Ok(inner)
    }

    pub fn absorb<M: VolumeNet<B::InnerBackend>>(&mut self, inner: BasicClassifier<B::InnerBackend, M>) {
        self.counters = inner.counters;
        self.metrics  = inner.metrics;
        self.log      = inner.log;
    }
}

fn to_vec<T: burn::tensor::Element>(data: TensorData) -> Result<Vec<T>> {
    data.convert::<T>().to_vec::<T>().map_err(|e| anyhow!("Cannot read tensor: {e:?}"))
}

impl<B: Backend, N: VolumeNet<B>> VeryBasicModel<B> for BasicClassifier<B, N> {
    fn counters_mut(&mut self) -> &mut StepCounters {
        &mut self.counters
    }

    fn forward(&self, source: Tensor<B, 5>) -> Result<Tensor<B, 2>> {
        Ok(self.net.forward(source))
    }

    fn step(
        &mut self,
        batch:      &VolumeBatch<B>,
        _batch_idx: usize,
        split:      Split,
        step:       i64,
    ) -> Result<Tensor<B, 1>> {
        let batch_size = batch.batch_size();

        // ── Forward + loss ────────────────────────────────────────────────────
        let logits = self.forward(batch.source.clone())?;
        let [_, classes] = logits.dims();
        if classes != self.config.out_ch {
            bail!("network produced {classes} logits, expected {}", self.config.out_ch);
        }
        let loss = self.loss.forward(logits.clone(), batch.target.clone());

        // ── Metrics (no gradient) ─────────────────────────────────────────────
        let scores  = to_vec::<f32>(softmax(logits.detach(), 1).into_data())?;
        let targets = to_vec::<i64>(batch.target.clone().into_data())?;
        self.metrics.get_mut(split).update(&scores, &targets)?;

        let loss_value = loss.clone().detach().into_scalar().elem::<f64>();
        self.log.log_step(&format!("{split}/loss"), loss_value, step, batch_size);

        Ok(loss)
    }

    fn epoch_end(&mut self, split: Split) -> Result<()> {
        let metrics = self.metrics.get_mut(split);
        for (name, value) in metrics.compute() {
            self.log.log_epoch(&format!("{split}/{name}"), value);
        }
        metrics.reset();
        self.log.close_epoch(&format!("{split}/"));

        tracing::info!(
            "{} epoch {}: loss={:.4} ACC={:.4} AUC_ROC={:.4}",
            split,
            self.log.epoch(),
            self.log.latest(&format!("{split}/loss")).unwrap_or(f64::NAN),
            self.log.latest(&format!("{split}/ACC")).unwrap_or(f64::NAN),
            self.log.latest(&format!("{split}/AUC_ROC")).unwrap_or(f64::NAN),
        );
        Ok(())
    }
}
