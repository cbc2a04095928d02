//! Resolution: the fixed ladder of bar widths, coarsest first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Milliseconds in one calendar day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// Bar width. Variant order is the total order from coarsest (index 0) to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "3h")]
    H3,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "1m")]
    M1,
}

impl Resolution {
    pub const COUNT: usize = 10;

    /// All resolutions, coarsest first.
    pub const ALL: [Resolution; Self::COUNT] = [
        Resolution::D1,
        Resolution::H12,
        Resolution::H6,
        Resolution::H3,
        Resolution::H2,
        Resolution::H1,
        Resolution::M30,
        Resolution::M15,
        Resolution::M5,
        Resolution::M1,
    ];

    pub const COARSEST: Resolution = Resolution::D1;
    pub const FINEST: Resolution = Resolution::M1;

    /// Resolution every model is trained and simulated on.
    pub const TRAINING: Resolution = Resolution::H1;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn periods_per_day(self) -> u32 {
        match self {
            Resolution::D1 => 1,
            Resolution::H12 => 2,
            Resolution::H6 => 4,
            Resolution::H3 => 8,
            Resolution::H2 => 12,
            Resolution::H1 => 24,
            Resolution::M30 => 48,
            Resolution::M15 => 96,
            Resolution::M5 => 288,
            Resolution::M1 => 1440,
        }
    }

    /// Inverse of [`Resolution::periods_per_day`].
    pub fn from_periods_per_day(periods_per_day: u32) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.periods_per_day() == periods_per_day)
            .ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "no resolution with {periods_per_day} periods per day"
                ))
            })
    }

    /// Bar width in milliseconds.
    pub fn duration_ms(self) -> i64 {
        MS_PER_DAY / i64::from(self.periods_per_day())
    }

    pub fn name(self) -> &'static str {
        match self {
            Resolution::D1 => "1d",
            Resolution::H12 => "12h",
            Resolution::H6 => "6h",
            Resolution::H3 => "3h",
            Resolution::H2 => "2h",
            Resolution::H1 => "1h",
            Resolution::M30 => "30m",
            Resolution::M15 => "15m",
            Resolution::M5 => "5m",
            Resolution::M1 => "1m",
        }
    }

    /// Next coarser resolution, `None` for 1d.
    pub fn coarser(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    /// Next finer resolution, `None` for 1m.
    pub fn finer(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Whether whole bars of this resolution fill every `coarser` bar exactly.
    pub fn tiles(self, coarser: Resolution) -> bool {
        self.periods_per_day() % coarser.periods_per_day() == 0
    }

    /// Nearest finer resolution whose bars tile this one; `None` for 1m.
    ///
    /// 3h skips 2h and consolidates from 1h.
    pub fn consolidation_source(self) -> Option<Self> {
        let mut finer = self.finer();
        while let Some(candidate) = finer {
            if candidate.tiles(self) {
                return Some(candidate);
            }
            finer = candidate.finer();
        }
        None
    }

    /// This resolution and every coarser one, finest first.
    pub fn and_coarser(self) -> impl Iterator<Item = Resolution> {
        (0..=self.index()).rev().filter_map(Self::from_index)
    }

    /// Start of the bar of this width that contains `time`.
    pub fn align(self, time: i64) -> i64 {
        time - time.rem_euclid(self.duration_ms())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name() == needle)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown resolution '{s}'")))
    }
}
