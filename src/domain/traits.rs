// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The dataset never opens files itself: it asks a VolumeSource
// for the scan that belongs to a manifest row. The production
// source reads NIfTI from the preprocessed data root; tests
// substitute an in-memory source so the dataset and pipeline
// can be exercised without fixtures on disk.

use anyhow::Result;

use crate::domain::manifest::ManifestRow;
use crate::domain::volume::Volume;

// ─── VolumeSource ─────────────────────────────────────────────────────────────
/// Anything that can produce the raw scan for a subject.
///
/// Implementations:
///   - NiftiVolumeSource → `<root>/Breast_MRI_<uid>/sub.nii.gz`
pub trait VolumeSource: Send + Sync {
    /// Load the untransformed volume for `row`.
    /// Called on every dataset access; implementations do not cache.
    fn load_volume(&self, row: &ManifestRow) -> Result<Volume>;
}
