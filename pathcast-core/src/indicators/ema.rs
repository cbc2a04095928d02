//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = k * x[t] + (1 - k) * EMA[t-1], with k = 2 / (periods + 1).
//! Seed: EMA[0] = x[0], so the output has the same length as the input.

use crate::error::CoreError;

pub fn ema(values: &[f64], periods: usize) -> Result<Vec<f64>, CoreError> {
    let first = *values
        .first()
        .ok_or_else(|| CoreError::invalid_argument("EMA requires at least one value"))?;
    if periods == 0 {
        return Err(CoreError::invalid_argument("EMA periods must be >= 1"));
    }

    let k = 2.0 / (periods as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = first;
    out.push(prev);
    for &x in &values[1..] {
        prev = x * k + prev * (1.0 - k);
        out.push(prev);
    }
    Ok(out)
}

/// Final EMA value.
pub fn last_ema(values: &[f64], periods: usize) -> Result<f64, CoreError> {
    let series = ema(values, periods)?;
    series
        .last()
        .copied()
        .ok_or_else(|| CoreError::invalid_argument("EMA requires at least one value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn seeded_with_first_value() {
        let out = ema(&[10.0, 20.0, 30.0], 3).unwrap();
        // k = 0.5
        assert_approx(out[0], 10.0, DEFAULT_EPSILON);
        assert_approx(out[1], 15.0, DEFAULT_EPSILON);
        assert_approx(out[2], 22.5, DEFAULT_EPSILON);
    }

    #[test]
    fn constant_series_is_fixed_point() {
        assert_approx(last_ema(&[4.0; 50], 9).unwrap(), 4.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rejects_empty_and_zero_periods() {
        assert!(ema(&[], 3).is_err());
        assert!(ema(&[1.0], 0).is_err());
    }
}
