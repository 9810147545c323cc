// ============================================================
// Layer 4 — Volume Loader
// ============================================================
// Reads preprocessed scans from the data root using the nifti
// crate. Each subject has its own directory:
//
//   <data_root>/
//     Breast_MRI_001/sub.nii.gz
//     Breast_MRI_002/sub.nii.gz
//     ...
//
// NIfTI voxels come back indexed (x, y, z[, t]). We always hand a
// channels-first Volume to the pipeline:
//   3D  (W, H, D)    → (1, W, H, D)
//   4D  (W, H, D, C) → (C, W, H, D)
//
// Voxel spacing is taken from pixdim[1..4]. Headers written by
// some tools leave it at zero, in which case 1 mm is assumed.
//
// There is no cache: every call re-reads and re-decompresses.

use anyhow::{bail, Context, Result};
use ndarray::{Array4, ArrayD, Axis, Ix3, Ix4};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};

use crate::domain::{manifest::ManifestRow, traits::VolumeSource, volume::Volume};

/// File name of the cropped scan inside a subject directory
pub const VOLUME_FILE: &str = "sub.nii.gz";

/// Loads subject volumes from `<root>/Breast_MRI_<uid>/sub.nii.gz`.
#[derive(Debug, Clone)]
pub struct NiftiVolumeSource {
    root: PathBuf,
}

impl NiftiVolumeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the scan for `row` is expected to live
    pub fn volume_path(&self, row: &ManifestRow) -> PathBuf {
        self.root.join(row.subject_dir()).join(VOLUME_FILE)
    }
}

impl VolumeSource for NiftiVolumeSource {
    fn load_volume(&self, row: &ManifestRow) -> Result<Volume> {
        let path = self.volume_path(row);
        read_nifti(&path)
            .with_context(|| format!("Cannot load volume for subject '{}'", row.uid))
    }
}

/// Read a NIfTI file into a channels-first Volume.
pub fn read_nifti(path: &Path) -> Result<Volume> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Cannot read NIfTI file '{}'", path.display()))?;

    let pixdim  = obj.header().pixdim;
    let spacing = [
        sanitize_spacing(pixdim[1]),
        sanitize_spacing(pixdim[2]),
        sanitize_spacing(pixdim[3]),
    ];

    let voxels = obj
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("Cannot decode voxels of '{}'", path.display()))?;

    let data = channels_first(voxels)?;
    tracing::debug!("Loaded '{}' shape={:?} spacing={:?}", path.display(), data.shape(), spacing);

    Ok(Volume::new(data, spacing))
}

fn channels_first(voxels: ArrayD<f32>) -> Result<Array4<f32>> {
    match voxels.ndim() {
        3 => Ok(voxels.into_dimensionality::<Ix3>()?.insert_axis(Axis(0))),
        4 => {
            let v = voxels.into_dimensionality::<Ix4>()?;
            Ok(v.permuted_axes([3, 0, 1, 2]).as_standard_layout().into_owned())
        }
        n => bail!("expected a 3D or 4D volume, got {n} dimensions"),
    }
}

fn sanitize_spacing(s: f32) -> f32 {
    if s.is_finite() && s > 0.0 { s } else { 1.0 }
}
