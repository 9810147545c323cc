// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Loads a single sample through the full pipeline and reports its
// shape and intensity statistics. Handy for checking a data root
// and transform settings before a long run.

use anyhow::Result;

use crate::data::{
    dataset::{DatasetConfig, Sample, VolumeDataset},
    transforms::TransformConfig,
};
use crate::domain::split::Split;

/// What `inspect` prints
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    pub uid:         String,
    pub target:      i64,
    pub shape:       Vec<usize>,
    pub spacing:     [f32; 3],
    pub min:         f32,
    pub max:         f32,
    pub mean:        f64,
    pub pipeline:    String,
    pub dataset_len: usize,
}

impl SampleReport {
    fn from_sample(sample: &Sample, pipeline: String, dataset_len: usize) -> Self {
        let data = &sample.source.data;
        let (min, max) = data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = if data.is_empty() {
            f64::NAN
        } else {
            data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64
        };

        Self {
            uid:     sample.uid.clone(),
            target:  sample.target,
            shape:   data.shape().to_vec(),
            spacing: sample.source.spacing,
            min,
            max,
            mean,
            pipeline,
            dataset_len,
        }
    }
}

pub struct InspectUseCase {
    dataset:    DatasetConfig,
    transforms: TransformConfig,
    split:      Option<Split>,
    index:      usize,
}

impl InspectUseCase {
    pub fn new(dataset: DatasetConfig, transforms: TransformConfig, split: Option<Split>, index: usize) -> Self {
        Self { dataset, transforms, split, index }
    }

    pub fn execute(&self) -> Result<SampleReport> {
        let dataset = VolumeDataset::new(&self.dataset, self.split, &self.transforms)?;
        let sample  = dataset.try_get(self.index)?;
        Ok(SampleReport::from_sample(&sample, dataset.pipeline().describe(), dataset.rows().len()))
    }
}
