// ============================================================
// Layer 3 — Split Domain Type
// ============================================================
// Every subject in a fold is assigned to exactly one split.
// The training wrapper keeps separate step counters and metric
// accumulators for each split, so instead of a map keyed by
// "train" / "val" / "test" strings we carry a fixed record with
// one field per split. A typo becomes a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The partition a manifest row (or a training step) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// All splits in canonical order
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// The label used in the manifest and in logged metric names
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val   => "val",
            Split::Test  => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train"               => Ok(Split::Train),
            "val" | "validation"  => Ok(Split::Val),
            "test"                => Ok(Split::Test),
            other => Err(format!("unknown split '{other}' (expected train, val or test)")),
        }
    }
}

// ─── PerSplit ─────────────────────────────────────────────────────────────────
/// One value per split.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerSplit<T> {
    pub train: T,
    pub val:   T,
    pub test:  T,
}

impl<T> PerSplit<T> {
    /// Build each field from the split it belongs to
    pub fn from_fn(mut f: impl FnMut(Split) -> T) -> Self {
        Self {
            train: f(Split::Train),
            val:   f(Split::Val),
            test:  f(Split::Test),
        }
    }

    pub fn get(&self, split: Split) -> &T {
        match split {
            Split::Train => &self.train,
            Split::Val   => &self.val,
            Split::Test  => &self.test,
        }
    }

    pub fn get_mut(&mut self, split: Split) -> &mut T {
        match split {
            Split::Train => &mut self.train,
            Split::Val   => &mut self.val,
            Split::Test  => &mut self.test,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_manifest_labels() {
        assert_eq!("train".parse::<Split>().unwrap(), Split::Train);
        assert_eq!("VAL".parse::<Split>().unwrap(),   Split::Val);
        assert_eq!(" test ".parse::<Split>().unwrap(), Split::Test);
        assert!("holdout".parse::<Split>().is_err());
    }

    #[test]
    fn test_per_split_fields_are_independent() {
        let mut counts: PerSplit<i64> = PerSplit::from_fn(|_| -1);
        *counts.get_mut(Split::Val) += 3;
        assert_eq!(*counts.get(Split::Train), -1);
        assert_eq!(*counts.get(Split::Val),    2);
        assert_eq!(*counts.get(Split::Test),  -1);
    }
}
