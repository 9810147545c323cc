// ============================================================
// Layer 6 — Scalar Metric Log
// ============================================================
// Two halves:
//
//   MetricLog      in-memory. The classifier logs into it during
//                  steps and at epoch end; the trainer drains the
//                  finished records and reads the latest values
//                  (e.g. the checkpoint monitor).
//
//   MetricsLogger  appends drained records to metrics.csv.
//
// Step-level values are recorded as "<name>_step". Values logged
// with on_epoch are averaged over the epoch, weighted by batch
// size, and recorded under the plain name when the epoch closes.
//
// Example CSV output:
//   epoch,step,name,value
//   1,0,train/loss_step,0.701234
//   1,,train/loss,0.693100
//   1,,val/AUC_ROC,0.612500

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

/// One logged scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub epoch: usize,
    /// Per-split step counter; empty for epoch-level values
    pub step:  Option<i64>,
    pub name:  String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct WeightedMean {
    sum:    f64,
    weight: f64,
}

impl WeightedMean {
    fn add(&mut self, value: f64, weight: f64) {
        self.sum    += value * weight;
        self.weight += weight;
    }

    fn mean(&self) -> f64 {
        if self.weight > 0.0 { self.sum / self.weight } else { f64::NAN }
    }
}

// ─── MetricLog ────────────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct MetricLog {
    epoch:   usize,
    records: Vec<ScalarRecord>,
    running: BTreeMap<String, WeightedMean>,
    latest:  BTreeMap<String, f64>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Record a per-step value and fold it into the epoch mean.
    pub fn log_step(&mut self, name: &str, value: f64, step: i64, batch_size: usize) {
        let step_name = format!("{name}_step");
        self.push(step_name, Some(step), value);
        self.running.entry(name.to_string()).or_default().add(value, batch_size as f64);
    }

    /// Record an epoch-level value directly.
    pub fn log_epoch(&mut self, name: &str, value: f64) {
        self.push(name.to_string(), None, value);
    }

    /// Close the running means whose names start with `prefix`.
    pub fn close_epoch(&mut self, prefix: &str) {
        let names: Vec<String> = self
            .running
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect();
        for name in names {
            if let Some(mean) = self.running.remove(&name) {
                self.push(name, None, mean.mean());
            }
        }
    }

    /// Drop the latest values whose names start with `prefix`, so a
    /// pass that logs nothing reads as missing rather than stale.
    pub fn forget(&mut self, prefix: &str) {
        self.latest.retain(|name, _| !name.starts_with(prefix));
    }

    /// Most recent value logged under `name`
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.latest.get(name).copied()
    }

    /// Hand over the records logged since the previous drain.
    pub fn drain(&mut self) -> Vec<ScalarRecord> {
        std::mem::take(&mut self.records)
    }

    fn push(&mut self, name: String, step: Option<i64>, value: f64) {
        tracing::debug!(epoch = self.epoch, ?step, "{name} = {value:.6}");
        self.latest.insert(name.clone(), value);
        self.records.push(ScalarRecord { epoch: self.epoch, step, name, value });
    }
}

// ─── MetricsLogger ────────────────────────────────────────────────────────────
/// Appends scalar records to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut writer = csv::Writer::from_path(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writer.write_record(["epoch", "step", "name", "value"])?;
            writer.flush()?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, records: &[ScalarRecord]) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        for r in records {
            writer.serialize(r)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
