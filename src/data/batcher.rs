// ============================================================
// Layer 4 — Volume Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<Sample> into
// tensors for one forward pass.
//
//   Input:  N samples, each source shaped (C, D, H, W)
//   Output: source [N, C, D, H, W]  (float)
//           target [N]              (int class index)
//
// Samples must share a shape, which the pipeline's CropOrPad
// stage guarantees. UIDs travel alongside for logging.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::Sample;

/// A batch of volumes ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct VolumeBatch<B: Backend> {
    /// Subject ids, in batch order
    pub uids: Vec<String>,

    /// Volumes — shape: [batch_size, channels, depth, height, width]
    pub source: Tensor<B, 5>,

    /// Class labels — shape: [batch_size]
    pub target: Tensor<B, 1, Int>,
}

impl<B: Backend> VolumeBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.uids.len()
    }
}

/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct VolumeBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> VolumeBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<Sample, VolumeBatch<B>> for VolumeBatcher<B> {
    fn batch(&self, items: Vec<Sample>) -> VolumeBatch<B> {
        let uids: Vec<String> = items.iter().map(|s| s.uid.clone()).collect();
        let targets: Vec<i64> = items.iter().map(|s| s.target).collect();

        let volumes: Vec<Tensor<B, 4>> = items
            .into_iter()
            .map(|s| {
                let shape  = s.source.data.shape().to_vec();
                let voxels = s.source.data.iter().copied().collect::<Vec<f32>>();
                Tensor::<B, 4>::from_data(TensorData::new(voxels, shape), &self.device)
            })
            .collect();

        let source = Tensor::stack::<5>(volumes, 0);
        let target = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets, [uids.len()]),
            &self.device,
        );

        VolumeBatch { uids, source, target }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::volume::Volume;
    use burn::backend::NdArray;
    use ndarray::Array4;

    type TestBackend = NdArray;

    fn sample(uid: &str, target: i64, fill: f32) -> Sample {
        let mut source = Volume::new(Array4::from_elem((1, 2, 3, 4), fill), [1.0; 3]);
        source.data[[0, 1, 2, 3]] = -fill;
        Sample { uid: uid.to_string(), source, target }
    }

    #[test]
    fn test_batch_shapes_and_values() {
        let batcher = VolumeBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![sample("a", 0, 1.0), sample("b", 1, 2.0), sample("c", 1, 3.0)]);

        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.uids, vec!["a", "b", "c"]);
        assert_eq!(batch.source.dims(), [3, 1, 2, 3, 4]);
        assert_eq!(batch.target.dims(), [3]);

        let targets = batch.target.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 1, 1]);

        let voxels = batch.source.into_data().to_vec::<f32>().unwrap();
        // last voxel of the second sample
        assert_eq!(voxels[2 * 24 - 1], -2.0);
        assert_eq!(voxels[24], 2.0);
    }
}
