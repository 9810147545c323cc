// ============================================================
// Layer 3 — Manifest Row Domain Type
// ============================================================
// The split manifest is a CSV with one row per subject. Only four
// columns matter here; anything else in the file is ignored.
//
//   UID,Fold,Split,Malignant
//   001,0,train,1
//   002,0,val,0
//
// UID is kept as a string: subject directories are named
// `Breast_MRI_<uid>` and the ids carry leading zeros.

use serde::{Deserialize, Serialize};

use crate::domain::split::Split;

/// A single subject entry from the split manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Subject identifier — names the volume directory on disk
    #[serde(rename = "UID")]
    pub uid: String,

    /// Cross-validation fold this row belongs to
    #[serde(rename = "Fold")]
    pub fold: i64,

    /// Partition within the fold
    #[serde(rename = "Split")]
    pub split: Split,

    /// Class label: 1 = malignant, 0 = benign
    #[serde(rename = "Malignant")]
    pub malignant: i64,
}

impl ManifestRow {
    /// Name of the subject directory under the data root
    pub fn subject_dir(&self) -> String {
        format!("Breast_MRI_{}", self.uid)
    }
}
