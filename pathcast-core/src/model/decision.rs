//! Decision buckets of the bucket classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a future profit falls relative to the training profits' mean and stddev.
///
/// Variant order is the child-slot order of a model node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Decision {
    StrongSell,
    Sell,
    WeakSell,
    WeakBuy,
    Buy,
    StrongBuy,
}

impl Decision {
    pub const COUNT: usize = 6;

    pub const ALL: [Decision; Self::COUNT] = [
        Decision::StrongSell,
        Decision::Sell,
        Decision::WeakSell,
        Decision::WeakBuy,
        Decision::Buy,
        Decision::StrongBuy,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Label a profit: beyond two stddevs is strong, beyond one is plain, the rest is weak.
    pub fn from_profit(profit: f64, stddev: f64, average: f64) -> Self {
        if profit <= average - 2.0 * stddev {
            Decision::StrongSell
        } else if profit >= average + 2.0 * stddev {
            Decision::StrongBuy
        } else if profit <= average - stddev {
            Decision::Sell
        } else if profit >= average + stddev {
            Decision::Buy
        } else if profit >= average {
            Decision::WeakBuy
        } else {
            Decision::WeakSell
        }
    }

    /// Representative profit of the bucket: the middle of its band, 2.5 stddevs for strong.
    pub fn to_profit(self, stddev: f64, average: f64) -> f64 {
        let offset = match self {
            Decision::StrongSell => -2.5,
            Decision::Sell => -1.5,
            Decision::WeakSell => -0.5,
            Decision::WeakBuy => 0.5,
            Decision::Buy => 1.5,
            Decision::StrongBuy => 2.5,
        };
        average + offset * stddev
    }

    pub fn name(self) -> &'static str {
        match self {
            Decision::StrongSell => "StrongSell",
            Decision::Sell => "Sell",
            Decision::WeakSell => "WeakSell",
            Decision::WeakBuy => "WeakBuy",
            Decision::Buy => "Buy",
            Decision::StrongBuy => "StrongBuy",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
