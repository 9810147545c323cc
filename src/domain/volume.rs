// ============================================================
// Layer 3 — Volume Domain Type
// ============================================================
// A scan is a 4D f32 array plus the physical size of a voxel.
//
// Axis layout:
//   Spatial   → (C, W, H, D)  as read from NIfTI (x, y, z)
//   Canonical → (C, D, H, W)  after tensor conversion, which is
//                             what the batcher and networks expect
//
// Spacing is always stored in (W, H, D) order, in millimetres.

use ndarray::Array4;

/// Order of the three spatial axes after the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisLayout {
    Spatial,
    Canonical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data:    Array4<f32>,
    pub spacing: [f32; 3],
    pub layout:  AxisLayout,
}

impl Volume {
    /// Wrap freshly loaded voxels (spatial layout)
    pub fn new(data: Array4<f32>, spacing: [f32; 3]) -> Self {
        Self { data, spacing, layout: AxisLayout::Spatial }
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[0]
    }

    /// The three trailing dimensions, in the current layout's order
    pub fn spatial_shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[1], s[2], s[3]]
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }
}
