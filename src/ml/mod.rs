// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches burn modules, losses and optimizers.
//
//   model.rs      — VolumeNet trait (forward + named parameters)
//                   and a small reference network
//
//   metrics.rs    — streaming Accuracy / AUROC accumulators
//
//   optim.rs      — optimizer and LR schedule settings
//
//   classifier.rs — the training wrapper: step hooks, per-split
//                   step counters and metrics, loss, checkpoint
//                   loading
//
//   trainer.rs    — epoch loop: backward pass, optimizer step,
//                   validation, best-checkpoint tracking
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Network trait and reference pooled-linear network
pub mod model;

/// Epoch-level classification metrics
pub mod metrics;

/// Optimizer and learning-rate schedule settings
pub mod optim;

/// VeryBasicModel / BasicModel / BasicClassifier
pub mod classifier;

/// Full training loop with validation and checkpointing
pub mod trainer;
