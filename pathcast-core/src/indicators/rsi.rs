//! Relative Strength Index (RSI) and its bucketed forms.
//!
//! Sums gains and losses over the trailing `periods - 1` price changes
//! (periods is capped at `len - 1`). RS = gain / loss; RSI = 100 - 100 / (1 + RS).

use crate::error::CoreError;

pub fn rsi(prices: &[f64], periods: usize) -> Result<f64, CoreError> {
    if prices.is_empty() {
        return Err(CoreError::invalid_argument("RSI requires at least one price"));
    }
    if periods == 0 {
        return Err(CoreError::invalid_argument("RSI periods must be >= 1"));
    }

    let len = prices.len();
    let periods = periods.min(len - 1);
    let stop = len - periods;

    let (mut gain, mut loss) = (0.0, 0.0);
    let mut i = len - 1;
    while i > stop {
        let diff = prices[i] - prices[i - 1];
        if diff >= 0.0 {
            gain += diff;
        } else {
            loss -= diff;
        }
        i -= 1;
    }

    if loss == 0.0 {
        // Flat window reads neutral, pure gains read saturated.
        return Ok(if gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = gain / loss;
    Ok(100.0 - 100.0 / (1.0 + rs))
}

/// Map RSI to {-2, -1, 0, 1, 2}: ≥80, ≥70, neutral, ≤30, ≤20.
pub fn rsi_bucket(value: f64) -> i32 {
    if value >= 80.0 {
        2
    } else if value >= 70.0 {
        1
    } else if value <= 20.0 {
        -2
    } else if value <= 30.0 {
        -1
    } else {
        0
    }
}

/// Sticky extreme: a non-neutral bucket pushes the previous critical value
/// further in its own direction, neutral leaves it unchanged.
pub fn last_critical_rsi(current: i32, previous: i32) -> i32 {
    match current {
        0 => previous,
        c if c >= 1 => previous.max(c),
        c => previous.min(c),
    }
}
