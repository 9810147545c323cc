// ============================================================
// Layer 5 — Streaming Classification Metrics
// ============================================================
// Accumulate predictions across the steps of an epoch, compute
// once at epoch end, then reset.
//
// Inputs to update():
//   scores  — row-major [n, num_classes] class probabilities
//   targets — [n] integer class indices
//
// Accuracy: share of rows whose argmax equals the target.
// AUROC:    one-vs-rest per class, macro-averaged over the classes
//           that have both positives and negatives. Each per-class
//           AUC is the Mann-Whitney statistic with average ranks for
//           ties, so it is exact (no thresholds).
//
// compute() on an empty accumulator returns 0.0 for accuracy and
// NaN for AUROC.

use anyhow::{bail, Result};

/// Common shape of every epoch-level metric.
pub trait Metric: Send + Sync {
    /// Fold one batch into the running state
    fn update(&mut self, scores: &[f32], targets: &[i64]) -> Result<()>;

    /// Value over everything seen since the last reset
    fn compute(&self) -> f64;

    /// Forget everything
    fn reset(&mut self);

    /// Number of rows accumulated
    fn count(&self) -> usize;

    fn name(&self) -> &str;
}

fn check_batch(num_classes: usize, scores: &[f32], targets: &[i64]) -> Result<()> {
    if scores.len() != targets.len() * num_classes {
        bail!(
            "expected {} scores for {} targets x {} classes, got {}",
            targets.len() * num_classes, targets.len(), num_classes, scores.len(),
        );
    }
    if let Some(t) = targets.iter().find(|&&t| t < 0 || t as usize >= num_classes) {
        bail!("target {t} outside [0, {num_classes})");
    }
    Ok(())
}

// ─── Accuracy ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Accuracy {
    num_classes: usize,
    correct:     usize,
    total:       usize,
}

impl Accuracy {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes, correct: 0, total: 0 }
    }
}

impl Metric for Accuracy {
    fn update(&mut self, scores: &[f32], targets: &[i64]) -> Result<()> {
        check_batch(self.num_classes, scores, targets)?;
        for (row, &target) in scores.chunks(self.num_classes).zip(targets) {
            // first index wins on ties
            let predicted = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0;
            if predicted as i64 == target {
                self.correct += 1;
            }
            self.total += 1;
        }
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total   = 0;
    }

    fn count(&self) -> usize {
        self.total
    }

    fn name(&self) -> &str {
        "ACC"
    }
}

// ─── AUROC ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Auroc {
    num_classes: usize,
    scores:      Vec<f32>,
    targets:     Vec<i64>,
}

impl Auroc {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes, scores: Vec::new(), targets: Vec::new() }
    }

    /// One-vs-rest AUC for `class`, or None if only one label is present.
    pub fn class_auc(&self, class: usize) -> Option<f64> {
        let pairs: Vec<(f32, bool)> = self
            .scores
            .chunks(self.num_classes)
            .zip(&self.targets)
            .map(|(row, &t)| (row[class], t as usize == class))
            .collect();
        binary_auc(&pairs)
    }
}

/// Mann-Whitney AUC with average ranks for tied scores.
pub fn binary_auc(pairs: &[(f32, bool)]) -> Option<f64> {
    let positives = pairs.iter().filter(|p| p.1).count();
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<(f32, bool)> = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0f64;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
            j += 1;
        }
        // ranks are 1-based; the tie group i..=j shares their mean
        let rank = (i + j) as f64 / 2.0 + 1.0;
        positive_rank_sum += rank * sorted[i..=j].iter().filter(|p| p.1).count() as f64;
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

impl Metric for Auroc {
    fn update(&mut self, scores: &[f32], targets: &[i64]) -> Result<()> {
        check_batch(self.num_classes, scores, targets)?;
        self.scores.extend_from_slice(scores);
        self.targets.extend_from_slice(targets);
        Ok(())
    }

    fn compute(&self) -> f64 {
        let aucs: Vec<f64> = (0..self.num_classes).filter_map(|c| self.class_auc(c)).collect();
        if aucs.is_empty() {
            f64::NAN
        } else {
            aucs.iter().sum::<f64>() / aucs.len() as f64
        }
    }

    fn reset(&mut self) {
        self.scores.clear();
        self.targets.clear();
    }

    fn count(&self) -> usize {
        self.targets.len()
    }

    fn name(&self) -> &str {
        "AUC_ROC"
    }
}

// ─── ClassificationMetrics ────────────────────────────────────────────────────
/// The pair of accumulators kept per split.
#[derive(Debug, Clone)]
pub struct ClassificationMetrics {
    pub accuracy: Accuracy,
    pub auroc:    Auroc,
}

impl ClassificationMetrics {
    pub fn new(num_classes: usize) -> Self {
        Self { accuracy: Accuracy::new(num_classes), auroc: Auroc::new(num_classes) }
    }

    pub fn update(&mut self, scores: &[f32], targets: &[i64]) -> Result<()> {
        self.accuracy.update(scores, targets)?;
        self.auroc.update(scores, targets)
    }

    /// (name, value) for each metric
    pub fn compute(&self) -> [(&str, f64); 2] {
        [
            (self.accuracy.name(), self.accuracy.compute()),
            (self.auroc.name(),    self.auroc.compute()),
        ]
    }

    pub fn reset(&mut self) {
        self.accuracy.reset();
        self.auroc.reset();
    }

    pub fn is_empty(&self) -> bool {
        self.accuracy.count() == 0 && self.auroc.count() == 0
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_argmax() {
        let mut acc = Accuracy::new(2);
        acc.update(&[0.9, 0.1, 0.2, 0.8, 0.6, 0.4], &[0, 1, 1]).unwrap();
        assert!((acc.compute() - 2.0 / 3.0).abs() < 1e-9);
        acc.reset();
        assert_eq!(acc.compute(), 0.0);
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn test_perfect_and_inverted_auc() {
        let good = [(0.9, true), (0.8, true), (0.2, false), (0.1, false)];
        assert_eq!(binary_auc(&good), Some(1.0));
        let bad = [(0.1, true), (0.2, true), (0.8, false), (0.9, false)];
        assert_eq!(binary_auc(&bad), Some(0.0));
    }

    #[test]
    fn test_ties_count_half() {
        let tied = [(0.5, true), (0.5, false)];
        assert_eq!(binary_auc(&tied), Some(0.5));
        // 3 of 4 positive/negative pairs ordered, one tie
        let mixed = [(0.7, true), (0.4, true), (0.4, false), (0.1, false)];
        assert_eq!(binary_auc(&mixed), Some(0.875));
    }

    #[test]
    fn test_single_label_auc_is_undefined() {
        assert_eq!(binary_auc(&[(0.3, true), (0.6, true)]), None);
        let mut auc = Auroc::new(2);
        auc.update(&[0.3, 0.7, 0.4, 0.6], &[1, 1]).unwrap();
        assert!(auc.compute().is_nan());
    }

    #[test]
    fn test_two_class_macro_equals_binary() {
        let mut auc = Auroc::new(2);
        // softmax rows; class-1 probability ranks 3 of 4 pairs correctly
        auc.update(&[0.2, 0.8, 0.6, 0.4], &[1, 1]).unwrap();
        auc.update(&[0.7, 0.3, 0.5, 0.5], &[0, 0]).unwrap();
        assert!((auc.compute() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_reset_forgets_previous_epoch() {
        let mut m = ClassificationMetrics::new(2);
        m.update(&[0.1, 0.9, 0.9, 0.1], &[0, 1]).unwrap();
        let [(_, acc), (_, auc)] = m.compute();
        assert_eq!(acc, 0.0);
        assert_eq!(auc, 0.0);

        m.reset();
        assert!(m.is_empty());
        m.update(&[0.9, 0.1, 0.1, 0.9], &[0, 1]).unwrap();
        let [(_, acc), (_, auc)] = m.compute();
        assert_eq!(acc, 1.0);
        assert_eq!(auc, 1.0);
    }

    #[test]
    fn test_bad_batches_rejected() {
        let mut acc = Accuracy::new(2);
        assert!(acc.update(&[0.5, 0.5, 0.5], &[0, 1]).is_err());
        assert!(acc.update(&[0.5, 0.5], &[2]).is_err());
        assert_eq!(acc.count(), 0);
    }
}
