// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Frequency Table
//!
//! The discrete set of operating points a CPU (or a group of CPUs sharing a
//! clock) supports, and the lookup that maps an arbitrary requested frequency
//! onto one of them.
//!
//! All frequencies are in kHz, as in the cpufreq sysfs interface.
//!
//!```
//!     use scx_cpufreq::{FrequencyTable, Relation};
//!     let table = FrequencyTable::new(vec![300_000, 600_000, 900_000]).unwrap();
//!     let op = table.resolve(750_000, Relation::RoundDown).unwrap();
//!     assert_eq!(op.frequency, 600_000);
//!     let op = table.resolve(750_000, Relation::RoundUp).unwrap();
//!     assert_eq!(op.frequency, 900_000);
//!```

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use anyhow::Result;

/// Rounding direction applied when the requested frequency is not an exact
/// table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Highest entry at or below the target.
    RoundDown,
    /// Lowest entry at or above the target.
    RoundUp,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::RoundDown => write!(f, "down"),
            Relation::RoundUp => write!(f, "up"),
        }
    }
}

impl FromStr for Relation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "down" | "h" | "high" => Ok(Relation::RoundDown),
            "up" | "l" | "low" => Ok(Relation::RoundUp),
            _ => bail!("Unknown relation {:?}, expected \"down\" or \"up\"", s),
        }
    }
}

/// A single table entry selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingPoint {
    pub index: usize,
    pub frequency: u32,
}

/// Inclusive `[min, max]` frequency range in kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyBounds {
    pub min: u32,
    pub max: u32,
}

impl PolicyBounds {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, freq: u32) -> bool {
        freq >= self.min && freq <= self.max
    }

    /// Clamp these bounds into the hardware limits `hw`.
    ///
    /// Both ends are pulled into `hw` independently, then `min` is capped at
    /// `max` so the result is never inverted.
    pub fn verify_within(&self, hw: &PolicyBounds) -> PolicyBounds {
        let mut min = self.min;
        let mut max = self.max;

        if min < hw.min {
            min = hw.min;
        }
        if max < hw.min {
            max = hw.min;
        }
        if min > hw.max {
            min = hw.max;
        }
        if max > hw.max {
            max = hw.max;
        }
        if min > max {
            min = max;
        }

        PolicyBounds { min, max }
    }
}

/// Supported frequencies of a CPU in ascending order, without duplicates.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    freqs: Vec<u32>,
}

impl FrequencyTable {
    /// Build a table from the supplied entries. Zero entries are treated as
    /// invalid and skipped; the remainder is sorted and deduplicated.
    pub fn new(mut freqs: Vec<u32>) -> Result<FrequencyTable> {
        freqs.retain(|&f| f != 0);
        freqs.sort_unstable();
        freqs.dedup();

        if freqs.is_empty() {
            bail!("Frequency table has no valid entries");
        }

        Ok(FrequencyTable { freqs })
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.freqs
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn min(&self) -> u32 {
        self.freqs[0]
    }

    pub fn max(&self) -> u32 {
        self.freqs[self.freqs.len() - 1]
    }

    /// Hardware limits implied by the table.
    pub fn bounds(&self) -> PolicyBounds {
        PolicyBounds::new(self.min(), self.max())
    }

    pub fn contains(&self, freq: u32) -> bool {
        self.freqs.binary_search(&freq).is_ok()
    }

    /// Find the entry nearest to `target` in the direction of `relation`.
    pub fn resolve(&self, target: u32, relation: Relation) -> Option<OperatingPoint> {
        self.resolve_within(&self.bounds(), target, relation)
    }

    /// Like [`FrequencyTable::resolve`], considering only entries inside
    /// `bounds`.
    pub fn resolve_within(
        &self,
        bounds: &PolicyBounds,
        target: u32,
        relation: Relation,
    ) -> Option<OperatingPoint> {
        let candidates = self
            .freqs
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, f)| bounds.contains(f));

        let (index, frequency) = match relation {
            Relation::RoundDown => candidates.filter(|&(_, f)| f <= target).last()?,
            Relation::RoundUp => candidates.filter(|&(_, f)| f >= target).next()?,
        };

        Some(OperatingPoint { index, frequency })
    }
}
