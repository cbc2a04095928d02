//! Fitted predictors: a nearest-centroid bucket classifier and a least-squares line.
//!
//! Both fit from plain `f64` rows and serialize to JSON, tagged by kind.

use serde::{Deserialize, Serialize};

use super::decision::Decision;
use crate::error::{CoreError, CoreResult};
use crate::indicators::stats;

/// Ridge term added to the normal equations, relative to the mean diagonal.
pub const RIDGE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predictor {
    DecisionBucket(BucketClassifier),
    Linear(LinearModel),
}

impl Predictor {
    pub fn width(&self) -> usize {
        match self {
            Predictor::DecisionBucket(c) => c.means.len(),
            Predictor::Linear(m) => m.coefficients.len(),
        }
    }
}

fn check_rows(rows: &[Vec<f64>], targets: usize) -> CoreResult<usize> {
    let Some(first) = rows.first() else {
        return Err(CoreError::invalid_argument("cannot fit a predictor on zero rows"));
    };
    if rows.len() != targets {
        return Err(CoreError::invalid_argument(format!(
            "{} rows but {targets} targets",
            rows.len()
        )));
    }
    let width = first.len();
    if rows.iter().any(|r| r.len() != width) {
        return Err(CoreError::invalid_argument("feature rows differ in width"));
    }
    Ok(width)
}

fn check_width(row: &[f64], width: usize) -> CoreResult<()> {
    if row.len() != width {
        return Err(CoreError::invalid_argument(format!(
            "predictor expects {width} features, got {}",
            row.len()
        )));
    }
    Ok(())
}

/// Nearest centroid in standardized feature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketClassifier {
    means: Vec<f64>,
    scales: Vec<f64>,
    /// One centroid per decision, `None` for buckets absent from the training labels.
    centroids: Vec<Option<Vec<f64>>>,
}

impl BucketClassifier {
    pub fn fit(rows: &[Vec<f64>], labels: &[Decision]) -> CoreResult<Self> {
        let width = check_rows(rows, labels.len())?;

        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);
        for col in 0..width {
            let values: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            means.push(stats::mean(&values)?);
            let sd = stats::std_dev(&values)?;
            scales.push(if sd > 0.0 { sd } else { 1.0 });
        }

        let mut sums = vec![vec![0.0; width]; Decision::COUNT];
        let mut counts = [0usize; Decision::COUNT];
        for (row, label) in rows.iter().zip(labels) {
            let b = label.index();
            counts[b] += 1;
            for (col, value) in row.iter().enumerate() {
                sums[b][col] += (value - means[col]) / scales[col];
            }
        }
        let centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, n)| (n > 0).then(|| sum.into_iter().map(|s| s / n as f64).collect()))
            .collect();

        Ok(Self {
            means,
            scales,
            centroids,
        })
    }

    pub fn classify(&self, row: &[f64]) -> CoreResult<Decision> {
        check_width(row, self.means.len())?;
        let z: Vec<f64> = row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect();

        let mut best: Option<(Decision, f64)> = None;
        for (at, centroid) in self.centroids.iter().enumerate() {
            let (Some(centroid), Some(decision)) = (centroid, Decision::from_index(at)) else {
                continue;
            };
            let distance: f64 = centroid
                .iter()
                .zip(&z)
                .map(|(c, x)| (c - x) * (c - x))
                .sum();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((decision, distance));
            }
        }
        best.map(|(d, _)| d)
            .ok_or_else(|| CoreError::invalid_state("bucket classifier has no centroids"))
    }
}

/// `y = coefficients · x + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Ordinary least squares on centered data.
    pub fn fit(rows: &[Vec<f64>], targets: &[f64]) -> CoreResult<Self> {
        let width = check_rows(rows, targets.len())?;
        let n = rows.len() as f64;

        let x_mean: Vec<f64> = (0..width)
            .map(|c| rows.iter().map(|r| r[c]).sum::<f64>() / n)
            .collect();
        let y_mean = targets.iter().sum::<f64>() / n;

        let mut gram = vec![vec![0.0; width]; width];
        let mut moment = vec![0.0; width];
        for (row, y) in rows.iter().zip(targets) {
            let yc = y - y_mean;
            for i in 0..width {
                let xi = row[i] - x_mean[i];
                moment[i] += xi * yc;
                for j in i..width {
                    gram[i][j] += xi * (row[j] - x_mean[j]);
                }
            }
        }
        for i in 0..width {
            for j in 0..i {
                gram[i][j] = gram[j][i];
            }
        }
        let trace: f64 = (0..width).map(|i| gram[i][i]).sum();
        let ridge = RIDGE * (trace / width.max(1) as f64).max(1.0);
        for (i, row) in gram.iter_mut().enumerate() {
            row[i] += ridge;
        }

        let coefficients = solve(gram, moment)?;
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(b, m)| b * m)
                .sum::<f64>();
        Ok(Self {
            coefficients,
            intercept,
        })
    }

    pub fn predict(&self, row: &[f64]) -> CoreResult<f64> {
        check_width(row, self.coefficients.len())?;
        Ok(self
            .coefficients
            .iter()
            .zip(row)
            .map(|(b, x)| b * x)
            .sum::<f64>()
            + self.intercept)
    }
}

/// Gaussian elimination with partial pivoting. Columns without a usable pivot get 0.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> CoreResult<Vec<f64>> {
    let n = b.len();
    let mut usable = vec![true; n];
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-300 {
            usable[col] = false;
            continue;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for col in (0..n).rev() {
        if !usable[col] {
            continue;
        }
        let tail: f64 = (col + 1..n).map(|k| a[col][k] * x[k]).sum();
        x[col] = (b[col] - tail) / a[col][col];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::invalid_state("least squares produced a non-finite coefficient"));
    }
    Ok(x)
}
