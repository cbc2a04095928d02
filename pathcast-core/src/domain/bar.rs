//! Bar: one OHLC interval, the unit every store slot is made of.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::indicators::stats;

/// Milliseconds since the Unix epoch, UTC.
pub type Timestamp = i64;

/// Price as persisted. Arithmetic happens in `f64`.
pub type Price = f32;

/// Immutable OHLC bar covering `[start, end]` (both inclusive, in ms).
///
/// Feed bars end one millisecond before the next bar starts, so a 1m bar
/// starting at `t` ends at `t + 59_999`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start: Timestamp,
    pub end: Timestamp,
    pub open: Price,
    pub close: Price,
    pub high: Price,
    pub low: Price,
    pub median: Price,
}

impl Bar {
    /// Build a bar, rejecting inverted intervals and negative or non-finite prices.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        open: Price,
        close: Price,
        high: Price,
        low: Price,
        median: Price,
    ) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::invalid_argument(format!(
                "bar start {start} is after end {end}"
            )));
        }
        for (name, value) in [
            ("open", open),
            ("close", close),
            ("high", high),
            ("low", low),
            ("median", median),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::invalid_argument(format!(
                    "bar {name} price must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(Self {
            start,
            end,
            open,
            close,
            high,
            low,
            median,
        })
    }

    /// Build a bar whose median is the median of `{open, close, low, high}`.
    pub fn from_ohlc(
        start: Timestamp,
        end: Timestamp,
        open: Price,
        close: Price,
        high: Price,
        low: Price,
    ) -> Result<Self, CoreError> {
        let median = stats::median(&[
            f64::from(open),
            f64::from(close),
            f64::from(low),
            f64::from(high),
        ])
        .unwrap_or(f64::from(close));
        Self::new(start, end, open, close, high, low, median as Price)
    }

    /// Fold an ordered, non-empty run of bars into one coarser bar.
    ///
    /// `start`/`open` come from the first bar, `end`/`close` from the last,
    /// `high`/`low` are the extremes and `median` is the median of the closes.
    pub fn consolidate(bars: &[Bar]) -> Result<Self, CoreError> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err(CoreError::invalid_argument("cannot consolidate zero bars")),
        };
        let high = bars.iter().map(|b| b.high).fold(Price::MIN, Price::max);
        let low = bars.iter().map(|b| b.low).fold(Price::MAX, Price::min);
        let closes: Vec<f64> = bars.iter().map(|b| f64::from(b.close)).collect();
        let median = stats::median(&closes).unwrap_or(f64::from(last.close));

        Self::new(
            first.start,
            last.end,
            first.open,
            last.close,
            high,
            low,
            median as Price,
        )
    }

    /// True if `time` falls inside `[start, end]`.
    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && time <= self.end
    }
}
