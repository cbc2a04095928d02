//! MACD: fast EMA minus slow EMA, its signal EMA and the histogram.

use super::ema::ema;
use crate::error::CoreError;

pub const SLOW_PERIODS: usize = 26;
pub const FAST_PERIODS: usize = 12;
pub const SIGNAL_PERIODS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub hist: f64,
}

impl Macd {
    /// MACD with the standard 26/12/9 spans.
    pub fn compute(prices: &[f64]) -> Result<Self, CoreError> {
        Self::with_periods(prices, SLOW_PERIODS, FAST_PERIODS, SIGNAL_PERIODS)
    }

    pub fn with_periods(
        prices: &[f64],
        slow: usize,
        fast: usize,
        signal: usize,
    ) -> Result<Self, CoreError> {
        if fast > slow {
            return Err(CoreError::invalid_argument(format!(
                "fast span {fast} must not exceed slow span {slow}"
            )));
        }
        let slow_ema = ema(prices, slow)?;
        let fast_ema = ema(prices, fast)?;
        let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
        let signal_ema = ema(&line, signal)?;

        let macd = line[line.len() - 1];
        let signal = signal_ema[signal_ema.len() - 1];
        Ok(Self {
            macd,
            signal,
            hist: macd - signal,
        })
    }
}
