//! Descriptive statistics over `f64` slices.
//!
//! Standard deviations are sample deviations (divide by `n - 1`).

use crate::error::CoreError;

fn require_values(values: &[f64], what: &str) -> Result<(), CoreError> {
    if values.is_empty() {
        return Err(CoreError::invalid_argument(format!(
            "{what} requires at least one value"
        )));
    }
    Ok(())
}

fn require_same_len(a: &[f64], b: &[f64], what: &str) -> Result<(), CoreError> {
    require_values(a, what)?;
    if a.len() != b.len() {
        return Err(CoreError::invalid_argument(format!(
            "{what} requires equal lengths, got {} and {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

pub fn mean(values: &[f64]) -> Result<f64, CoreError> {
    require_values(values, "mean")?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// `Σ value_i × weight_i`. Weights are expected to be normalized already.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Result<f64, CoreError> {
    require_same_len(values, weights, "weighted mean")?;
    Ok(values.iter().zip(weights).map(|(v, w)| v * w).sum())
}

/// Median; the two middle values are averaged for even counts.
pub fn median(values: &[f64]) -> Result<f64, CoreError> {
    require_values(values, "median")?;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

/// Sample standard deviation. A single value has zero spread.
pub fn std_dev(values: &[f64]) -> Result<f64, CoreError> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Ok(0.0);
    }
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Ok((ss / (values.len() as f64 - 1.0)).sqrt())
}

/// Pearson correlation. Degenerate (constant) series correlate at zero.
pub fn correlation(a: &[f64], b: &[f64]) -> Result<f64, CoreError> {
    require_same_len(a, b, "correlation")?;
    let n = a.len() as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }
    let denom = ((n * sxx - sx * sx) * (n * syy - sy * sy)).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return Ok(0.0);
    }
    Ok((n * sxy - sx * sy) / denom)
}

/// Scale weights to sum to one.
pub fn normalize(weights: &[f64]) -> Result<Vec<f64>, CoreError> {
    require_values(weights, "normalize")?;
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(CoreError::invalid_state(format!(
            "cannot normalize weights summing to {total}"
        )));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// First differences `v[i] - v[i-1]`.
pub fn differences(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Clamp without panicking on inverted bounds; `lo` wins.
pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.min(hi).max(lo)
}

/// `ln(p[i + horizon] / p[i])`, zero where the horizon runs past the end.
pub fn future_profits(prices: &[f64], horizon: usize) -> Vec<f64> {
    (0..prices.len())
        .map(|i| match prices.get(i + horizon) {
            Some(future) if horizon > 0 => (future / prices[i]).ln(),
            _ => 0.0,
        })
        .collect()
}
