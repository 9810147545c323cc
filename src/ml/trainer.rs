// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives a BasicClassifier through epochs with burn's DataLoader
// and the optimizer it configures.
//
//   for each epoch:
//     train   training_step → backward → optimizer step (scheduled lr)
//             on_train_epoch_end
//     val     classifier.valid() on the inner backend (no autodiff,
//             dropout off) → validation_step per batch
//             on_validation_epoch_end
//     save    epoch=<n>.safetensors, metrics.csv rows
//     monitor update best_checkpoint.json when the monitored value
//             improves
//
// Every pass must deliver the whole dataset. burn's loaders end
// at the first sample that fails to load, so a short pass is an
// error carrying the recorded cause.
//
// Adam vs AdamW is decided at runtime; both feed the same generic
// loop so the concrete optimizer types never need to be named.

use anyhow::{bail, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    str::FromStr,
    sync::{atomic::Ordering, Arc},
};

use crate::data::{
    batcher::{VolumeBatch, VolumeBatcher},
    dataset::{LoadFailures, VolumeDataset},
};
use crate::domain::split::Split;
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::classifier::{BasicClassifier, VeryBasicModel};
use crate::ml::model::VolumeNet;
use crate::ml::optim::{OptimizerKind, OptimizerSetup};

// ─── Settings ─────────────────────────────────────────────────────────────────
/// Which logged value selects the best checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    /// `val/AUC_ROC`, higher is better
    ValAucRoc,
    /// `val/loss`, lower is better
    ValLoss,
}

impl Monitor {
    pub fn key(&self) -> &'static str {
        match self {
            Monitor::ValAucRoc => "val/AUC_ROC",
            Monitor::ValLoss   => "val/loss",
        }
    }

    /// NaN never improves; the first finite value always does.
    pub fn improves(&self, best: Option<f64>, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match (best, self) {
            (None, _)                    => true,
            (Some(b), Monitor::ValAucRoc) => value > b,
            (Some(b), Monitor::ValLoss)   => value < b,
        }
    }
}

impl FromStr for Monitor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "val/AUC_ROC" | "auc" | "auc_roc" => Ok(Monitor::ValAucRoc),
            "val/loss" | "loss"               => Ok(Monitor::ValLoss),
            other => Err(format!("cannot monitor '{other}' (expected val/AUC_ROC or val/loss)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs:      usize,
    pub batch_size:  usize,
    /// 0 loads batches on the calling thread
    pub num_workers: usize,
    /// Shuffle seed for the training loader
    pub seed:        u64,
    pub monitor:     Monitor,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs:      10,
            batch_size:  2,
            num_workers: 0,
            seed:        42,
            monitor:     Monitor::ValAucRoc,
        }
    }
}

// ─── Results ──────────────────────────────────────────────────────────────────
/// Epoch-level values of one split
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSummary {
    pub split:   Split,
    pub samples: usize,
    pub loss:    f64,
    pub acc:     f64,
    pub auc_roc: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch:      usize,
    pub train_loss: f64,
    pub val:        EvalSummary,
}

#[derive(Debug, Clone, Default)]
pub struct FitSummary {
    pub history:         Vec<EpochSummary>,
    pub best_score:      Option<f64>,
    pub best_checkpoint: Option<PathBuf>,
}

/// The inner-backend device matching an autodiff device.
pub fn inner_device<B: AutodiffBackend>(device: &B::Device) -> <B::InnerBackend as Backend>::Device {
    Tensor::<B, 1>::zeros([1], device).inner().device()
}

// ─── Loaders ──────────────────────────────────────────────────────────────────
fn build_loader<B: Backend>(
    dataset:     VolumeDataset,
    batch_size:  usize,
    num_workers: usize,
    shuffle:     Option<u64>,
    device:      B::Device,
) -> Arc<dyn DataLoader<VolumeBatch<B>>> {
    let mut builder = DataLoaderBuilder::new(VolumeBatcher::<B>::new(device)).batch_size(batch_size);
    if let Some(seed) = shuffle {
        builder = builder.shuffle(seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }
    builder.build(dataset)
}

/// Run every batch of `loader` through the split's step, then close the epoch.
/// Fail when the loader stopped before delivering every sample.
fn ensure_complete(split: Split, delivered: usize, expected: usize, failures: &LoadFailures) -> Result<()> {
    if delivered < expected {
        let cause = failures.take().unwrap_or_else(|| "loader stopped early".to_string());
        bail!("{split} pass delivered {delivered} of {expected} samples: {cause}");
    }
    Ok(())
}

fn run_split<B: Backend, N: VolumeNet<B>>(
    classifier: &mut BasicClassifier<B, N>,
    loader:     &dyn DataLoader<VolumeBatch<B>>,
    split:      Split,
    expected:   usize,
    failures:   &LoadFailures,
) -> Result<EvalSummary> {
    classifier.log_mut().forget(&format!("{split}/"));

    let mut samples = 0usize;
    for (batch_idx, batch) in loader.iter().enumerate() {
        samples += batch.batch_size();
        match split {
            Split::Train => classifier.training_step(&batch, batch_idx)?,
            Split::Val   => classifier.validation_step(&batch, batch_idx)?,
            Split::Test  => classifier.test_step(&batch, batch_idx)?,
        };
    }
    ensure_complete(split, samples, expected, failures)?;
    match split {
        Split::Train => classifier.on_train_epoch_end()?,
        Split::Val   => classifier.on_validation_epoch_end()?,
        Split::Test  => classifier.on_test_epoch_end()?,
    }
    if samples == 0 {
        tracing::warn!("{} split produced no batches", split);
    }

    let latest = |name: &str| classifier.log().latest(&format!("{split}/{name}")).unwrap_or(f64::NAN);
    Ok(EvalSummary {
        split,
        samples,
        loss:    latest("loss"),
        acc:     latest("ACC"),
        auc_roc: latest("AUC_ROC"),
    })
}

/// Evaluate on any backend: one pass over `dataset` as `split`, no gradients.
pub fn evaluate<B: Backend, N: VolumeNet<B>>(
    classifier:  &mut BasicClassifier<B, N>,
    dataset:     VolumeDataset,
    split:       Split,
    batch_size:  usize,
    num_workers: usize,
    device:      &B::Device,
) -> Result<EvalSummary> {
    let expected = dataset.len();
    let failures = dataset.failures();
    let loader   = build_loader::<B>(dataset, batch_size, num_workers, None, device.clone());
    run_split(classifier, loader.as_ref(), split, expected, &failures)
}

// ─── fit ──────────────────────────────────────────────────────────────────────
pub fn fit<B, N>(
    classifier: &mut BasicClassifier<B, N>,
    train:      VolumeDataset,
    val:        VolumeDataset,
    cfg:        &TrainerConfig,
    ckpt:       &CheckpointManager,
    logger:     &MetricsLogger,
    device:     &B::Device,
) -> Result<FitSummary>
where
    B: AutodiffBackend,
    N: VolumeNet<B> + AutodiffModule<B>,
    N::InnerModule: VolumeNet<B::InnerBackend>,
{
    if cfg.batch_size == 0 {
        bail!("batch_size must be at least 1");
    }
    let setup = classifier.configure_optimizers();
    tracing::info!(
        "Optimizer: {:?} lr={} weight_decay={} schedule={:?}",
        setup.optimizer.kind, setup.optimizer.lr, setup.optimizer.weight_decay,
        setup.scheduler.as_ref().map(|s| &s.schedule),
    );

    match setup.optimizer.kind {
        OptimizerKind::Adam => {
            let optim = setup.optimizer.adam_config().init::<B, N>();
            train_loop(classifier, optim, &setup, train, val, cfg, ckpt, logger, device)
        }
        OptimizerKind::AdamW => {
            let optim = setup.optimizer.adamw_config().init::<B, N>();
            train_loop(classifier, optim, &setup, train, val, cfg, ckpt, logger, device)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn train_loop<B, N, O>(
    classifier: &mut BasicClassifier<B, N>,
    mut optim:  O,
    setup:      &OptimizerSetup,
    train:      VolumeDataset,
    val:        VolumeDataset,
    cfg:        &TrainerConfig,
    ckpt:       &CheckpointManager,
    logger:     &MetricsLogger,
    device:     &B::Device,
) -> Result<FitSummary>
where
    B: AutodiffBackend,
    N: VolumeNet<B> + AutodiffModule<B>,
    N::InnerModule: VolumeNet<B::InnerBackend>,
    O: Optimizer<N, B>,
{
    // ── Data loaders ──────────────────────────────────────────────────────────
    let train = train.with_augment_seed(cfg.seed);
    let val   = val.with_augment_seed(cfg.seed);
    let (train_len, train_failures, train_epoch) = (train.len(), train.failures(), train.epoch_counter());
    let (val_len, val_failures) = (val.len(), val.failures());

    let train_loader = build_loader::<B>(train, cfg.batch_size, cfg.num_workers, Some(cfg.seed), device.clone());

    let val_loader   = build_loader::<B::InnerBackend>(val, cfg.batch_size, cfg.num_workers, None, inner_device::<B>(device));

    let mut summary    = FitSummary::default();
    let mut steps_done = 0usize;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        classifier.log_mut().set_epoch(epoch);
        classifier.log_mut().forget("train/");
        train_epoch.store(epoch, Ordering::Relaxed);

        // ── Training phase ────────────────────────────────────────────────────
        let mut delivered = 0usize;
        for (batch_idx, batch) in train_loader.iter().enumerate() {
            delivered += batch.batch_size();
            let lr   = setup.lr(steps_done, epoch - 1);
            let loss = classifier.training_step(&batch, batch_idx)?;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, classifier.net());
            let net   = optim.step(lr, classifier.net().clone(), grads);
            classifier.set_net(net);
            steps_done += 1;
        }
        ensure_complete(Split::Train, delivered, train_len, &train_failures)?;
        classifier.on_train_epoch_end()?;
        let train_loss = classifier.log().latest("train/loss").unwrap_or(f64::NAN);

        // ── Validation phase ──────────────────────────────────────────────────
        let mut inner = classifier.valid()?;
        let val_summary = run_split(&mut inner, val_loader.as_ref(), Split::Val, val_len, &val_failures);
        classifier.absorb(inner);
        let val_summary = val_summary?;

        // ── Artifacts ─────────────────────────────────────────────────────────
        logger.log(&classifier.log_mut().drain())?;
        let path  = ckpt.save_epoch(&classifier.state_dict(), epoch)?;
        let score = classifier.log().latest(cfg.monitor.key()).unwrap_or(f64::NAN);

        if cfg.monitor.improves(summary.best_score, score) {
            ckpt.save_best(&path)?;
            tracing::info!("New best {}={:.4} at epoch {}", cfg.monitor.key(), score, epoch);
            summary.best_score      = Some(score);
            summary.best_checkpoint = Some(path.clone());
        }

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_acc={:.1}% | val_auc={:.4}",
            epoch, cfg.epochs, train_loss, val_summary.loss,
            val_summary.acc * 100.0, val_summary.auc_roc,
        );

        summary.history.push(EpochSummary { epoch, train_loss, val: val_summary });

        // fall back to the latest epoch until something scores
        if summary.best_checkpoint.is_none() && epoch == cfg.epochs {
            tracing::warn!("{} never produced a usable value; pointing best at epoch {}", cfg.monitor.key(), epoch);
            ckpt.save_best(&path)?;
            summary.best_checkpoint = Some(path);
        }
    }

    tracing::info!("Training complete after {} optimizer steps", steps_done);
    Ok(summary)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::{rows, small_transforms, FailingSource, SyntheticSource};
    use crate::data::transforms::Pipeline;
    use crate::infra::checkpoint::{best_checkpoint_path, load_state_dict};
    use crate::ml::classifier::{ClassifierConfig, StepCounters};
    use crate::ml::model::{PooledLinearConfig, PooledLinearNet};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;
    type InnerBackend = NdArray;

    fn dataset(n: usize) -> VolumeDataset {
        VolumeDataset::from_parts(
            rows(n),
            Box::new(SyntheticSource::new([10, 9, 6])),
            Pipeline::from_config(&small_transforms()).unwrap(),
        )
    }

    fn dataset_failing_at(n: usize, bad_uid: &str) -> VolumeDataset {
        let source = FailingSource { inner: SyntheticSource::new([10, 9, 6]), bad_uid: bad_uid.into() };
        VolumeDataset::from_parts(rows(n), Box::new(source), Pipeline::from_config(&small_transforms()).unwrap())
    }

    fn classifier() -> BasicClassifier<TestBackend, PooledLinearNet<TestBackend>> {
        let device = Default::default();
        let net = PooledLinearConfig::new(1, 2).init(&device);
        BasicClassifier::new(net, ClassifierConfig::default(), &device).unwrap()
    }

    #[test]
    fn test_monitor_direction() {
        assert!(Monitor::ValAucRoc.improves(None, 0.1));
        assert!(Monitor::ValAucRoc.improves(Some(0.5), 0.6));
        assert!(!Monitor::ValAucRoc.improves(Some(0.5), 0.4));
        assert!(Monitor::ValLoss.improves(Some(0.5), 0.4));
        assert!(!Monitor::ValLoss.improves(None, f64::NAN));
        assert_eq!("val/loss".parse::<Monitor>(), Ok(Monitor::ValLoss));
        assert_eq!(Monitor::ValAucRoc.key().parse::<Monitor>(), Ok(Monitor::ValAucRoc));
    }

    #[test]
    fn test_fit_writes_artifacts() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let cfg    = TrainerConfig { epochs: 2, batch_size: 2, ..TrainerConfig::default() };

        let mut clf = classifier();
        let summary = fit(&mut clf, dataset(6), dataset(4), &cfg, &ckpt, &logger, &Default::default()).unwrap();

        assert_eq!(summary.history.len(), 2);
        assert!(dir.path().join("epoch=1.safetensors").exists());
        assert!(dir.path().join("epoch=2.safetensors").exists());

        let best = best_checkpoint_path(dir.path()).unwrap();
        assert_eq!(Some(best.clone()), summary.best_checkpoint);
        assert_eq!(load_state_dict(&best).unwrap().len(), 2);

        // 3 train batches and 2 val batches per epoch
        assert_eq!(clf.counters().current(Split::Train), 5);
        assert_eq!(clf.counters().current(Split::Val), 3);
        assert_eq!(summary.history[1].val.samples, 4);

        let csv = std::fs::read_to_string(logger.csv_path()).unwrap();
        assert!(csv.contains("train/loss_step"));
        assert!(csv.contains("val/AUC_ROC"));
    }

    #[test]
    fn test_training_changes_parameters() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let cfg    = TrainerConfig { epochs: 1, batch_size: 3, ..TrainerConfig::default() };

        let mut clf = classifier();
        let before  = clf.state_dict()["head.weight"].clone().to_vec::<f32>().unwrap();
        fit(&mut clf, dataset(6), dataset(2), &cfg, &ckpt, &logger, &Default::default()).unwrap();
        let after   = clf.state_dict()["head.weight"].clone().to_vec::<f32>().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_valid_copy_carries_state_back() {
        let mut clf = classifier();
        let mut inner = clf.valid().unwrap();
        assert_eq!(inner.counters(), &StepCounters::default());

        let summary = evaluate(&mut inner, dataset(3), Split::Test, 2, 0, &Default::default()).unwrap();
        assert_eq!(summary.samples, 3);
        assert!((0.0..=1.0).contains(&summary.acc));
        clf.absorb(inner);

        assert_eq!(clf.counters().current(Split::Test), 1);
        assert!(clf.log().latest("test/ACC").is_some());
    }

    #[test]
    fn test_evaluate_on_plain_backend() {
        let device = Default::default();
        let net = PooledLinearConfig::new(1, 2).init::<InnerBackend>(&device);
        let mut clf = BasicClassifier::new(net, ClassifierConfig::default(), &device).unwrap();
        let summary = evaluate(&mut clf, dataset(4), Split::Val, 4, 0, &device).unwrap();
        assert_eq!(summary.split, Split::Val);
        assert!(summary.loss.is_finite());
    }

    #[test]
    fn test_evaluate_fails_on_unreadable_sample() {
        let device = Default::default();
        let net = PooledLinearConfig::new(1, 2).init::<InnerBackend>(&device);
        let mut clf = BasicClassifier::new(net, ClassifierConfig::default(), &device).unwrap();

        let err = evaluate(&mut clf, dataset_failing_at(8, "002"), Split::Test, 2, 0, &device).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("delivered 2 of 8"), "{message}");
        assert!(message.contains("corrupt volume"), "{message}");
    }

    #[test]
    fn test_fit_fails_on_unreadable_sample() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let cfg    = TrainerConfig { epochs: 1, batch_size: 2, ..TrainerConfig::default() };

        let mut clf = classifier();
        let err = fit(&mut clf, dataset_failing_at(6, "004"), dataset(2), &cfg, &ckpt, &logger, &Default::default());
        assert!(format!("{:#}", err.unwrap_err()).contains("corrupt volume"));

        let mut clf = classifier();
        let err = fit(&mut clf, dataset(4), dataset_failing_at(4, "001"), &cfg, &ckpt, &logger, &Default::default());
        assert!(format!("{:#}", err.unwrap_err()).contains("val pass delivered"));
    }

    #[test]
    fn test_empty_pass_does_not_report_stale_loss() {
        let device = Default::default();
        let net = PooledLinearConfig::new(1, 2).init::<InnerBackend>(&device);
        let mut clf = BasicClassifier::new(net, ClassifierConfig::default(), &device).unwrap();

        let full = evaluate(&mut clf, dataset(4), Split::Val, 2, 0, &device).unwrap();
        assert!(full.loss.is_finite());

        let empty = evaluate(&mut clf, dataset(0), Split::Val, 2, 0, &device).unwrap();
        assert_eq!(empty.samples, 0);
        assert!(empty.loss.is_nan());
        assert!(empty.auc_roc.is_nan());
    }
}
