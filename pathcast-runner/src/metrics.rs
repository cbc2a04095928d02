//! Scoring of back-test output, and the comparison the combination search accepts moves by.
//!
//! A score is three numbers: how well simulated log-returns track real ones, how far simulated
//! prices stray from real ones, and how precise the model set that produced them claims to be.

use std::fmt;

use pathcast_core::indicators::stats;
use pathcast_core::model::{weighted_precision, ModelNode};
use pathcast_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

use crate::backtest::BacktestRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Squared Pearson correlation of real and simulated per-step log-returns.
    pub correlation: f64,
    /// Sample standard deviation of the per-step fractional price error.
    pub stddev: f64,
    /// Group-weighted precision of the simulating model set.
    pub precision: f64,
}

impl Score {
    pub fn new(correlation: f64, stddev: f64, precision: f64) -> Self {
        Self {
            correlation,
            stddev,
            precision,
        }
    }

    pub fn from_rows(rows: &[BacktestRow], nodes: &[&ModelNode]) -> CoreResult<Self> {
        if rows.is_empty() {
            return Err(CoreError::invalid_argument("cannot score an empty back-test"));
        }
        let differences: Vec<f64> = rows.iter().map(|r| r.p_difference).collect();
        let real: Vec<f64> = rows.iter().map(|r| r.real_change).collect();
        let simulated: Vec<f64> = rows.iter().map(|r| r.simulated_change).collect();

        let r = stats::correlation(&real, &simulated)?;
        Ok(Self {
            correlation: r * r,
            stddev: stats::std_dev(&differences)?,
            precision: weighted_precision(nodes)?,
        })
    }

    /// Less noise per unit of precision, and more correlation per unit of precision.
    pub fn is_better_than(&self, best: &Score) -> bool {
        is_better_combination(
            (self.correlation, self.stddev, self.precision),
            (best.correlation, best.stddev, best.precision),
        )
    }
}

/// `(correlation, stddev, precision)` of a candidate against the incumbent. Both conditions
/// must hold.
pub fn is_better_combination(current: (f64, f64, f64), best: (f64, f64, f64)) -> bool {
    let (cc, cs, cp) = current;
    let (bc, bs, bp) = best;
    cs / cp < bs / bp && cc * cp > bc * bp
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Correlation: {}({}) Std Dev: {}({})",
            self.correlation * self.precision,
            self.correlation,
            self.stddev / self.precision,
            self.stddev
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathcast_core::domain::{ModelId, Resolution};
    use pathcast_core::model::{Decision, ModelKind, NodeStats};

    fn row(p_difference: f64, real_change: f64, simulated_change: f64) -> BacktestRow {
        BacktestRow {
            end_time: 0,
            real_price: 1.0,
            simulated_price: 1.0 + p_difference,
            p_difference,
            real_change,
            simulated_change,
        }
    }

    fn node(id: u32, horizon: usize, precision: f64) -> ModelNode {
        let mut node = ModelNode::root(
            ModelId(id),
            ModelKind::Linear,
            Resolution::H1,
            horizon,
            vec!["Rsi;14".parse().unwrap()],
        );
        node.stats = Some(NodeStats {
            precision,
            profit_stddev: 0.01,
            profit_average: 0.0,
            is_singular: false,
            prediction_profits: [0.0; Decision::COUNT],
            reproduction_complete: true,
        });
        node
    }

    #[test]
    fn accepts_a_candidate_better_on_both_axes() {
        let best = Score::new(0.50, 0.02, 0.60);
        assert!(Score::new(0.55, 0.018, 0.62).is_better_than(&best));
    }

    #[test]
    fn rejects_a_noisier_candidate_even_when_more_correlated() {
        let best = Score::new(0.50, 0.02, 0.60);
        let candidate = Score::new(0.60, 0.025, 0.58);
        assert!(candidate.correlation * candidate.precision > best.correlation * best.precision);
        assert!(!candidate.is_better_than(&best));
    }

    #[test]
    fn equal_scores_are_not_an_improvement() {
        let s = Score::new(0.4, 0.01, 0.7);
        assert!(!s.is_better_than(&s));
    }

    #[test]
    fn perfectly_tracking_rows_score_full_correlation() {
        let rows = vec![
            row(0.01, 0.002, 0.004),
            row(-0.01, -0.001, -0.002),
            row(0.03, 0.003, 0.006),
        ];
        let a = node(1, 6, 0.7);
        let score = Score::from_rows(&rows, &[&a]).unwrap();
        assert!((score.correlation - 1.0).abs() < 1e-9);
        assert!((score.stddev - 0.02).abs() < 1e-9);
        assert!((score.precision - 0.7).abs() < 1e-12);
    }

    #[test]
    fn empty_rows_cannot_be_scored() {
        let a = node(1, 6, 0.7);
        assert!(Score::from_rows(&[], &[&a]).is_err());
    }

    #[test]
    fn display_shows_precision_scaled_values() {
        let text = Score::new(0.5, 0.02, 0.5).to_string();
        assert_eq!(text, "Correlation: 0.25(0.5) Std Dev: 0.04(0.02)");
    }
}
