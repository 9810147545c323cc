// ============================================================
// Layer 4 — Volume Dataset
// ============================================================
// Maps a sample index to a transformed scan and its label.
//
//   index ──► item_pointers[index] ──► manifest row
//                                         │
//                      VolumeSource ◄─────┘  (disk I/O, every call)
//                           │
//                      Pipeline.apply()     (fresh randomness per call)
//                           │
//                           ▼
//              Sample { uid, source, target }
//
// The row list and pointer order are fixed at construction. Nothing
// is cached: asking twice for the same index re-reads the file and,
// when augmentation is on, produces a different source. With an
// augmentation seed the randomness is a function of
// (seed, epoch, index) instead, so runs are reproducible.
//
// burn's Dataset::get has no error channel and its loaders stop at
// the first None. A failed load is therefore recorded in
// LoadFailures; whoever drives the loader compares the number of
// samples delivered against len() and reports the recorded error.

use anyhow::{anyhow, Context, Result};
use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::data::splits::load_split;
use crate::data::transforms::{Pipeline, TransformConfig};
use crate::data::volume::NiftiVolumeSource;
use crate::domain::{manifest::ManifestRow, split::Split, traits::VolumeSource, volume::Volume};

/// One transformed training example.
#[derive(Debug, Clone)]
pub struct Sample {
    pub uid:    String,
    pub source: Volume,
    pub target: i64,
}

// ─── DatasetConfig ────────────────────────────────────────────────────────────
/// Where the data lives and which rows to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset root; holds `preprocessed_crop/{data,splits}`
    pub path_root: PathBuf,
    /// Override for `<root>/preprocessed_crop/splits/split.csv`
    pub manifest:  Option<PathBuf>,
    /// Override for `<root>/preprocessed_crop/data`
    pub data_dir:  Option<PathBuf>,
    pub fold:      i64,
    /// Keep only this share of the filtered rows (seeded)
    pub fraction:  Option<f64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path_root: PathBuf::from("data/Duke-Breast-Cancer-MRI"),
            manifest:  None,
            data_dir:  None,
            fold:      0,
            fraction:  None,
        }
    }
}

impl DatasetConfig {
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest.clone().unwrap_or_else(|| {
            self.path_root.join("preprocessed_crop").join("splits").join("split.csv")
        })
    }

    pub fn data_path(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            self.path_root.join("preprocessed_crop").join("data")
        })
    }
}

// ─── LoadFailures ─────────────────────────────────────────────────────────────
/// First sample failure seen by `Dataset::get`, shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct LoadFailures(Arc<Mutex<Option<String>>>);

impl LoadFailures {
    fn record(&self, message: String) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(message);
        }
    }

    /// Take the recorded failure, leaving the slot empty.
    pub fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

// ─── VolumeDataset ────────────────────────────────────────────────────────────
pub struct VolumeDataset {
    rows:          Vec<ManifestRow>,
    item_pointers: Vec<usize>,
    source:        Box<dyn VolumeSource>,
    pipeline:      Pipeline,
    augment_seed:  Option<u64>,
    epoch:         Arc<AtomicUsize>,
    failures:      LoadFailures,
}

impl VolumeDataset {
    /// Load the manifest, filter it, and build the standard pipeline.
    pub fn new(cfg: &DatasetConfig, split: Option<Split>, transforms: &TransformConfig) -> Result<Self> {
        let pipeline = Pipeline::from_config(transforms)?;
        Self::with_pipeline(cfg, split, pipeline)
    }

    /// Same as [`VolumeDataset::new`] with a caller-built pipeline.
    pub fn with_pipeline(cfg: &DatasetConfig, split: Option<Split>, pipeline: Pipeline) -> Result<Self> {
        let rows   = load_split(cfg.manifest_path(), cfg.fold, split, cfg.fraction)?;
        let source = NiftiVolumeSource::new(cfg.data_path());
        Ok(Self::from_parts(rows, Box::new(source), pipeline))
    }

    /// Assemble from already-filtered rows and any volume source.
    pub fn from_parts(rows: Vec<ManifestRow>, source: Box<dyn VolumeSource>, pipeline: Pipeline) -> Self {
        let item_pointers = (0..rows.len()).collect();
        tracing::info!(
            "Dataset ready: {} samples, pipeline: {}",
            rows.len(),
            pipeline.describe(),
        );
        Self {
            rows,
            item_pointers,
            source,
            pipeline,
            augment_seed: None,
            epoch:        Arc::new(AtomicUsize::new(0)),
            failures:     LoadFailures::default(),
        }
    }

    /// Derive each sample's randomness from (seed, epoch, index).
    pub fn with_augment_seed(mut self, seed: u64) -> Self {
        self.augment_seed = Some(seed);
        self
    }

    /// Epoch mixed into seeded augmentation; the trainer bumps it.
    pub fn epoch_counter(&self) -> Arc<AtomicUsize> {
        self.epoch.clone()
    }

    pub fn failures(&self) -> LoadFailures {
        self.failures.clone()
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// (benign, malignant) counts over the retained rows
    pub fn class_counts(&self) -> (usize, usize) {
        let malignant = self.rows.iter().filter(|r| r.malignant != 0).count();
        (self.rows.len() - malignant, malignant)
    }

    /// Load and transform one sample: seeded RNG if configured,
    /// otherwise the thread RNG.
    pub fn try_get(&self, index: usize) -> Result<Sample> {
        match self.augment_seed {
            Some(seed) => {
                let epoch = self.epoch.load(Ordering::Relaxed);
                self.try_get_with_rng(index, &mut sample_rng(seed, epoch, index))
            }
            None => self.try_get_with_rng(index, &mut rand::thread_rng()),
        }
    }

    /// Load and transform one sample with an explicit RNG.
    pub fn try_get_with_rng<R: Rng>(&self, index: usize, rng: &mut R) -> Result<Sample> {
        let pointer = *self.item_pointers.get(index).ok_or_else(|| {
            anyhow!("index {index} out of range for dataset of {} samples", self.item_pointers.len())
        })?;
        let row = &self.rows[pointer];

        let volume = self.source.load_volume(row)?;
        let source = self
            .pipeline
            .apply(volume, rng)
            .with_context(|| format!("Transform failed for subject '{}'", row.uid))?;

        Ok(Sample { uid: row.uid.clone(), source, target: row.malignant })
    }
}

fn sample_rng(seed: u64, epoch: usize, index: usize) -> StdRng {
    let mixed = seed
        ^ (epoch as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_add(1).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    StdRng::seed_from_u64(mixed)
}

impl Dataset<Sample> for VolumeDataset {
    fn get(&self, index: usize) -> Option<Sample> {
        if index >= self.item_pointers.len() {
            return None;
        }
        match self.try_get(index) {
            Ok(sample) => Some(sample),
            Err(e) => {
                let message = format!("sample {index}: {e:#}");
                tracing::error!("Cannot load {}", message);
                self.failures.record(message);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.item_pointers.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::volume::AxisLayout;
    use ndarray::{Array3, Array4};
    use nifti::writer::WriterOptions;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Fails for one subject, delegates the rest.
    pub(crate) struct FailingSource {
        pub inner:   SyntheticSource,
        pub bad_uid: String,
    }

    impl VolumeSource for FailingSource {
        fn load_volume(&self, row: &ManifestRow) -> Result<Volume> {
            if row.uid == self.bad_uid {
                anyhow::bail!("corrupt volume for subject '{}'", row.uid);
            }
            self.inner.load_volume(row)
        }
    }

    /// Generates a deterministic scan per subject and counts loads.
    pub(crate) struct SyntheticSource {
        pub shape: [usize; 3],
        pub loads: Arc<AtomicUsize>,
    }

    impl SyntheticSource {
        pub(crate) fn new(shape: [usize; 3]) -> Self {
            Self { shape, loads: Arc::new(AtomicUsize::new(0)) }
        }
    }

    impl VolumeSource for SyntheticSource {
        fn load_volume(&self, row: &ManifestRow) -> Result<Volume> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let seed: usize = row.uid.bytes().map(|b| b as usize).sum();
            let [w, h, d] = self.shape;
            let data = Array4::from_shape_fn((1, w, h, d), |(_, x, y, z)| {
                ((x * 13 + y * 7 + z * 3 + seed) % 50) as f32 + if row.malignant != 0 { 25.0 } else { 0.0 }
            });
            Ok(Volume::new(data, [1.0, 1.0, 1.0]))
        }
    }

    pub(crate) fn rows(n: usize) -> Vec<ManifestRow> {
        (0..n)
            .map(|i| ManifestRow {
                uid:       format!("{i:03}"),
                fold:      0,
                split:     Split::Train,
                malignant: (i % 2) as i64,
            })
            .collect()
    }

    pub(crate) fn small_transforms() -> TransformConfig {
        TransformConfig { image_crop: Some([8, 8, 4]), ..TransformConfig::default() }
    }

    fn dataset(n: usize, cfg: &TransformConfig) -> (VolumeDataset, Arc<AtomicUsize>) {
        let source = SyntheticSource::new([10, 9, 6]);
        let loads  = source.loads.clone();
        let ds = VolumeDataset::from_parts(rows(n), Box::new(source), Pipeline::from_config(cfg).unwrap());
        (ds, loads)
    }

    #[test]
    fn test_len_matches_rows() {
        let (ds, _) = dataset(7, &small_transforms());
        assert_eq!(ds.len(), 7);
        assert_eq!(ds.class_counts(), (4, 3));
    }

    #[test]
    fn test_get_returns_cropped_canonical_source() {
        let (ds, _) = dataset(3, &small_transforms());
        let s = ds.try_get(2).unwrap();
        assert_eq!(s.uid, "002");
        assert_eq!(s.target, 0);
        assert_eq!(s.source.data.shape(), &[1, 4, 8, 8]);
        assert_eq!(s.source.layout, AxisLayout::Canonical);
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let (ds, _) = dataset(3, &small_transforms());
        assert!(ds.try_get(3).is_err());
        assert!(ds.get(3).is_none());
    }

    #[test]
    fn test_every_access_reloads() {
        let (ds, loads) = dataset(2, &small_transforms());
        let a = ds.try_get(1).unwrap();
        let b = ds.try_get(1).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        // no augmentation → identical output
        assert_eq!(a.source, b.source);
    }

    #[test]
    fn test_augmented_access_varies() {
        let cfg = TransformConfig { noise: true, flip: true, ..small_transforms() };
        let (ds, _) = dataset(2, &cfg);
        let a = ds.try_get(0).unwrap();
        let b = ds.try_get(0).unwrap();
        assert_ne!(a.source, b.source);
    }

    #[test]
    fn test_failed_get_is_recorded() {
        let source = FailingSource { inner: SyntheticSource::new([10, 9, 6]), bad_uid: "001".into() };
        let ds = VolumeDataset::from_parts(rows(3), Box::new(source), Pipeline::from_config(&small_transforms()).unwrap());
        let failures = ds.failures();

        assert!(ds.get(0).is_some());
        assert!(failures.take().is_none());
        assert!(ds.get(1).is_none());
        let message = failures.take().unwrap();
        assert!(message.contains("corrupt volume"), "{message}");
        assert!(failures.take().is_none());
    }

    #[test]
    fn test_seeded_augmentation_is_reproducible() {
        let cfg = TransformConfig { noise: true, flip: true, random_rotate: true, ..small_transforms() };
        let (a, _) = dataset(2, &cfg);
        let (b, _) = dataset(2, &cfg);
        let a = a.with_augment_seed(7);
        let b = b.with_augment_seed(7);

        assert_eq!(a.try_get(1).unwrap().source, b.try_get(1).unwrap().source);
        assert_eq!(a.try_get(1).unwrap().source, a.try_get(1).unwrap().source);

        let first = a.try_get(1).unwrap().source;
        a.epoch_counter().store(1, Ordering::SeqCst);
        assert_ne!(a.try_get(1).unwrap().source, first);
    }

    #[test]
    fn test_loads_from_disk_layout() {
        let dir  = tempfile::tempdir().unwrap();
        let root = dir.path();
        let data = root.join("preprocessed_crop").join("data");
        let splits = root.join("preprocessed_crop").join("splits");
        std::fs::create_dir_all(&splits).unwrap();

        let mut csv = String::from("UID,Fold,Split,Malignant\n");
        for i in 0..4 {
            let uid = format!("{i:03}");
            csv.push_str(&format!("{uid},{},{},{}\n", i % 2, "train", i % 2));
            let subj = data.join(format!("Breast_MRI_{uid}"));
            std::fs::create_dir_all(&subj).unwrap();
            let voxels = Array3::from_shape_fn((12, 12, 6), |(x, y, z)| (x + y + z + i) as f32);
            WriterOptions::new(subj.join("sub.nii.gz")).write_nifti(&voxels).unwrap();
        }
        std::fs::write(splits.join("split.csv"), csv).unwrap();

        let cfg = DatasetConfig { path_root: root.to_path_buf(), fold: 1, ..DatasetConfig::default() };
        let ds  = VolumeDataset::new(&cfg, Some(Split::Train), &small_transforms()).unwrap();
        assert_eq!(ds.len(), 2);

        let s = ds.get(1).unwrap();
        assert_eq!(s.uid, "003");
        assert_eq!(s.target, 1);
        assert_eq!(s.source.data.shape(), &[1, 4, 8, 8]);
    }
}
