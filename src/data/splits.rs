// ============================================================
// Layer 4 — Split Loader
// ============================================================
// Reads the split manifest and keeps the rows a dataset needs.
//
// Filtering order (each step only sees what the previous kept):
//
//   1. Fold  == fold                    (always)
//   2. Split == split                   (if given)
//   3. random subset of round(f * n)    (if a fraction is given)
//
// The subset is drawn without replacement from an RNG seeded with
// a fixed value, so every call on the same filtered rows returns
// the same subjects in the same order. Rows come back in sampled
// order, not manifest order.
//
// Missing columns are reported by csv/serde as-is.

use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs::File, io::Read, path::Path};

use crate::domain::{manifest::ManifestRow, split::Split};

/// Seed for fraction sub-sampling
pub const SAMPLE_SEED: u64 = 0;

/// Load and filter the manifest at `path`.
pub fn load_split(
    path:     impl AsRef<Path>,
    fold:     i64,
    split:    Option<Split>,
    fraction: Option<f64>,
) -> Result<Vec<ManifestRow>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Cannot open split manifest '{}'", path.display()))?;

    load_split_from_reader(file, fold, split, fraction)
        .with_context(|| format!("Cannot load split manifest '{}'", path.display()))
}

/// Same as [`load_split`] but reads CSV from any stream.
pub fn load_split_from_reader<R: Read>(
    reader:   R,
    fold:     i64,
    split:    Option<Split>,
    fraction: Option<f64>,
) -> Result<Vec<ManifestRow>> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let mut rows = Vec::new();
    for (row_no, record) in csv_reader.deserialize::<ManifestRow>().enumerate() {
        rows.push(record.with_context(|| format!("manifest row {row_no}"))?);
    }
    let total = rows.len();

    let rows: Vec<ManifestRow> = rows
        .into_iter()
        .filter(|r| r.fold == fold)
        .filter(|r| split.map_or(true, |s| r.split == s))
        .collect();

    tracing::debug!(
        "Manifest: {} rows, {} kept for fold={} split={:?}",
        total, rows.len(), fold, split,
    );

    match fraction {
        Some(f) => sample_fraction(rows, f),
        None    => Ok(rows),
    }
}

/// Draw `round(fraction * len)` items without replacement, seeded.
pub fn sample_fraction<T>(items: Vec<T>, fraction: f64) -> Result<Vec<T>> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        bail!("fraction must be in (0, 1], got {fraction}");
    }

    let total  = items.len();
    let amount = ((total as f64) * fraction).round() as usize;
    let amount = amount.min(total);

    let mut rng    = StdRng::seed_from_u64(SAMPLE_SEED);
    let picked     = rand::seq::index::sample(&mut rng, total, amount);
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();

    Ok(picked.iter().filter_map(|i| slots[i].take()).collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn manifest() -> String {
        let mut csv = String::from("UID,Fold,Split,Malignant,Age\n");
        for i in 0..40 {
            let split = match i % 4 { 0 => "val", 1 => "test", _ => "train" };
            csv.push_str(&format!("{:03},{},{},{},50\n", i, i % 2, split, (i % 3 == 0) as i32));
        }
        csv
    }

    fn load(fold: i64, split: Option<Split>, fraction: Option<f64>) -> Result<Vec<ManifestRow>> {
        load_split_from_reader(Cursor::new(manifest()), fold, split, fraction)
    }

    #[test]
    fn test_fold_filter_is_exact() {
        let rows = load(1, None, None).unwrap();
        assert_eq!(rows.len(), 20);
        assert!(rows.iter().all(|r| r.fold == 1));
    }

    #[test]
    fn test_split_filter_applies_within_fold() {
        let rows = load(0, Some(Split::Train), None).unwrap();
        // fold 0 → even i; train → i % 4 == 2
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.fold == 0 && r.split == Split::Train));
    }

    #[test]
    fn test_manifest_order_preserved_without_fraction() {
        let rows = load(0, None, None).unwrap();
        let uids: Vec<&str> = rows.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(&uids[..3], &["000", "002", "004"]);
    }

    #[test]
    fn test_fraction_is_deterministic() {
        let a = load(1, None, Some(0.5)).unwrap();
        let b = load(1, None, Some(0.5)).unwrap();
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert!(a.iter().all(|r| r.fold == 1));
    }

    #[test]
    fn test_fraction_subset_has_no_duplicates() {
        let rows = load(0, None, Some(0.7)).unwrap();
        let mut uids: Vec<&str> = rows.iter().map(|r| r.uid.as_str()).collect();
        uids.sort();
        uids.dedup();
        assert_eq!(uids.len(), 14);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        assert!(load(0, None, Some(0.0)).is_err());
        assert!(load(0, None, Some(1.5)).is_err());
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let csv = "UID,Fold,Malignant\n001,0,1\n";
        assert!(load_split_from_reader(Cursor::new(csv), 0, None, None).is_err());
    }

    #[test]
    fn test_empty_fold() {
        let rows = load(7, None, Some(0.5)).unwrap();
        assert!(rows.is_empty());
    }
}
