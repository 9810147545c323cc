// ============================================================
// Layer 5 — Optimizer & Learning-Rate Schedule Settings
// ============================================================
// Plain serde data describing which optimizer to build and how
// its learning rate moves. The trainer turns these into burn's
// Adam / AdamW and queries the schedule before every step.
//
//   Constant            lr
//   Step  {size, γ}     lr · γ^⌊t / size⌋
//   Cosine{T, η_min}    η_min + (lr − η_min) · (1 + cos(π · min(t, T) / T)) / 2
//
// t counts optimizer steps or epochs depending on the interval,
// divided by the frequency.

use burn::optim::{decay::WeightDecayConfig, AdamConfig, AdamWConfig};
use serde::{Deserialize, Serialize};
use std::{f64::consts::PI, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    AdamW,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam"  => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            other => Err(format!("unknown optimizer '{other}' (expected adam or adamw)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind:         OptimizerKind,
    pub lr:           f64,
    pub weight_decay: f32,
}

impl OptimizerConfig {
    pub fn adam(lr: f64, weight_decay: f32) -> Self {
        Self { kind: OptimizerKind::Adam, lr, weight_decay }
    }

    pub fn adamw(lr: f64, weight_decay: f32) -> Self {
        Self { kind: OptimizerKind::AdamW, lr, weight_decay }
    }

    /// Adam with L2 penalty folded into the gradient
    pub fn adam_config(&self) -> AdamConfig {
        AdamConfig::new().with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay)))
    }

    /// AdamW with decoupled weight decay
    pub fn adamw_config(&self) -> AdamWConfig {
        AdamWConfig::new().with_weight_decay(self.weight_decay)
    }
}

// ─── LR schedules ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrSchedule {
    Constant,
    Step { step_size: usize, gamma: f64 },
    Cosine { t_max: usize, eta_min: f64 },
}

impl LrSchedule {
    pub fn lr_at(&self, base_lr: f64, t: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base_lr,
            LrSchedule::Step { step_size, gamma } => {
                base_lr * gamma.powi((t / step_size.max(1)) as i32)
            }
            LrSchedule::Cosine { t_max, eta_min } => {
                if t_max == 0 {
                    return eta_min;
                }
                let progress = t.min(t_max) as f64 / t_max as f64;
                eta_min + (base_lr - eta_min) * (1.0 + (PI * progress).cos()) / 2.0
            }
        }
    }
}

/// Command-line form: `constant`, `step:<size>:<gamma>`, `cosine:<t_max>[:<eta_min>]`
impl FromStr for LrSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let num = |i: usize, what: &str| -> Result<f64, String> {
            parts
                .get(i)
                .ok_or_else(|| format!("'{s}': missing {what}"))?
                .parse::<f64>()
                .map_err(|e| format!("'{s}': bad {what}: {e}"))
        };
        match parts[0].to_ascii_lowercase().as_str() {
            "constant" => Ok(LrSchedule::Constant),
            "step" => Ok(LrSchedule::Step {
                step_size: num(1, "step size")? as usize,
                gamma:     num(2, "gamma")?,
            }),
            "cosine" => Ok(LrSchedule::Cosine {
                t_max:   num(1, "t_max")? as usize,
                eta_min: if parts.len() > 2 { num(2, "eta_min")? } else { 0.0 },
            }),
            other => Err(format!("unknown schedule '{other}' (expected constant, step or cosine)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerInterval {
    Step,
    Epoch,
}

/// A schedule together with how often it advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSetup {
    pub schedule:  LrSchedule,
    pub interval:  SchedulerInterval,
    pub frequency: usize,
}

impl SchedulerSetup {
    /// Advance once per optimizer step
    pub fn per_step(schedule: LrSchedule) -> Self {
        Self { schedule, interval: SchedulerInterval::Step, frequency: 1 }
    }

    /// Learning rate for the next update, given steps and epochs completed so far.
    pub fn lr(&self, base_lr: f64, steps_done: usize, epochs_done: usize) -> f64 {
        let ticks = match self.interval {
            SchedulerInterval::Step  => steps_done,
            SchedulerInterval::Epoch => epochs_done,
        };
        self.schedule.lr_at(base_lr, ticks / self.frequency.max(1))
    }
}

/// What `configure_optimizers` hands to the trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSetup {
    pub optimizer: OptimizerConfig,
    pub scheduler: Option<SchedulerSetup>,
}

impl OptimizerSetup {
    pub fn lr(&self, steps_done: usize, epochs_done: usize) -> f64 {
        match &self.scheduler {
            Some(s) => s.lr(self.optimizer.lr, steps_done, epochs_done),
            None    => self.optimizer.lr,
        }
    }
}
