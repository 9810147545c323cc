// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from the split manifest on disk
// all the way to tensor batches.
//
// The pipeline flows in this order:
//
//   split.csv
//       │
//       ▼
//   load_split        → fold / split / fraction filtering
//       │
//       ▼
//   VolumeDataset     → implements Burn's Dataset trait
//       │                (index → manifest row)
//       ▼
//   NiftiVolumeSource → reads Breast_MRI_<uid>/sub.nii.gz
//       │
//       ▼
//   Pipeline          → resize / crop / normalize / augment
//       │
//       ▼
//   VolumeBatcher     → stacks samples into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Each module is responsible for exactly one step.

/// Reads and filters the split manifest
pub mod splits;

/// Loads NIfTI volumes from the data root
pub mod volume;

/// Declarative augmentation / preprocessing pipeline
pub mod transforms;

/// Implements Burn's Dataset trait for MRI samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
