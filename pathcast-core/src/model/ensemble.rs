//! Ensemble algebra: combine same-horizon DFPs into a WFP, weigh horizon groups against
//! each other and project a horizon group's WFP history into a price.

use std::collections::BTreeMap;

use super::node::ModelNode;
use crate::error::{CoreError, CoreResult};
use crate::indicators::{last_ema, stats};

/// Precision at which a node's combination weight reaches zero.
pub const ZERO_WEIGHT_PRECISION: f64 = 0.5;

/// Power applied to precision and profit stddev when weighing horizon groups.
pub const GROUP_WEIGHT_POWER: i32 = 6;

/// Horizons from here on project from a single WFP sample.
pub const LONG_HORIZON: usize = 48;

/// Most single-sample projections smoothed for short horizons.
pub const MAX_SMOOTHED_SAMPLES: usize = 24;

/// Normalized weights `max(0, (precision - 0.5) * 2)` for nodes sharing one horizon.
pub fn combine_weights(nodes: &[&ModelNode]) -> CoreResult<Vec<f64>> {
    let Some(first) = nodes.first() else {
        return Err(CoreError::invalid_argument("cannot combine zero models"));
    };
    if let Some(odd) = nodes.iter().find(|n| n.horizon != first.horizon) {
        return Err(CoreError::invalid_argument(format!(
            "model {} has horizon {}, expected {}",
            odd.id, odd.horizon, first.horizon
        )));
    }
    let raw = nodes
        .iter()
        .map(|n| Ok(((n.precision()? - ZERO_WEIGHT_PRECISION) * 2.0).max(0.0)))
        .collect::<CoreResult<Vec<f64>>>()?;
    stats::normalize(&raw).map_err(|_| {
        CoreError::invalid_state(format!(
            "no model of horizon {} is more than {ZERO_WEIGHT_PRECISION} precise",
            first.horizon
        ))
    })
}

/// Weighted future profit of one horizon group.
pub fn combine(nodes: &[&ModelNode], dfps: &[f64]) -> CoreResult<f64> {
    if nodes.len() != dfps.len() {
        return Err(CoreError::invalid_argument(format!(
            "{} models but {} predictions",
            nodes.len(),
            dfps.len()
        )));
    }
    stats::weighted_mean(dfps, &combine_weights(nodes)?)
}

pub fn group_by_horizon<'n>(nodes: &[&'n ModelNode]) -> BTreeMap<usize, Vec<&'n ModelNode>> {
    let mut groups: BTreeMap<usize, Vec<&'n ModelNode>> = BTreeMap::new();
    for &node in nodes {
        groups.entry(node.horizon).or_default().push(node);
    }
    groups
}

pub fn average_precision(nodes: &[&ModelNode]) -> CoreResult<f64> {
    let precisions = nodes
        .iter()
        .map(|n| n.precision())
        .collect::<CoreResult<Vec<_>>>()?;
    stats::mean(&precisions)
}

/// Cross-horizon weights, in the groups' key order: `precision^6 / stddev^6`, normalized.
///
/// A group's precision is its nodes' average; its stddev is that of its first node.
pub fn group_weights(groups: &BTreeMap<usize, Vec<&ModelNode>>) -> CoreResult<Vec<f64>> {
    let raw = groups
        .iter()
        .map(|(horizon, members)| {
            let first = members.first().ok_or_else(|| {
                CoreError::invalid_argument(format!("horizon group {horizon} is empty"))
            })?;
            let precision = average_precision(members)?;
            let stddev = first.profit_stddev()?;
            Ok(precision.powi(GROUP_WEIGHT_POWER) / stddev.powi(GROUP_WEIGHT_POWER))
        })
        .collect::<CoreResult<Vec<f64>>>()?;
    if raw.iter().any(|w| !w.is_finite()) {
        return Err(CoreError::invalid_state(
            "a horizon group has zero profit stddev",
        ));
    }
    stats::normalize(&raw)
        .map_err(|_| CoreError::invalid_state("every horizon group has zero weight"))
}

/// Precision of a whole model set as the simulation sees it: group-average precisions
/// weighted by [`group_weights`].
pub fn weighted_precision(nodes: &[&ModelNode]) -> CoreResult<f64> {
    let groups = group_by_horizon(nodes);
    let precisions = groups
        .values()
        .map(|members| average_precision(members))
        .collect::<CoreResult<Vec<_>>>()?;
    stats::weighted_mean(&precisions, &group_weights(&groups)?)
}

/// Price implied by one horizon group's WFP history.
///
/// `wfp` holds one sample per step, the newest belonging to the newest of `medians`; sample
/// `k` projects from `medians[len(medians) - 1 - len(wfp) + k]`. Long horizons use the single
/// oldest sample still inside the horizon, short ones smooth up to 24 projections with an EMA
/// spanning the sample count.
pub fn estimate_price(horizon: usize, wfp: &[f64], medians: &[f64]) -> CoreResult<f64> {
    if wfp.is_empty() {
        return Err(CoreError::invalid_argument("no WFP samples to estimate from"));
    }
    if medians.len() < wfp.len() + 1 {
        return Err(CoreError::invalid_argument(format!(
            "{} WFP samples need more than {} prices",
            wfp.len(),
            medians.len()
        )));
    }
    let offset = medians.len() - 1 - wfp.len();
    let start = wfp.len().saturating_sub(horizon);
    let project = |k: usize| medians[offset + k] * wfp[k].exp();

    if horizon >= LONG_HORIZON {
        return Ok(project(start));
    }
    let end = (start + horizon.min(MAX_SMOOTHED_SAMPLES)).min(wfp.len());
    let projections: Vec<f64> = (start..end).map(project).collect();
    last_ema(&projections, projections.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelId, Resolution};
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};
    use crate::model::decision::Decision;
    use crate::model::node::{ModelKind, NodeStats};

    fn trained(id: u32, horizon: usize, precision: f64, stddev: f64) -> ModelNode {
        let mut node = ModelNode::root(
            ModelId(id),
            ModelKind::Linear,
            Resolution::H1,
            horizon,
            vec!["Rsi;14".parse().unwrap()],
        );
        node.stats = Some(NodeStats {
            precision,
            profit_stddev: stddev,
            profit_average: 0.0,
            is_singular: false,
            prediction_profits: [0.0; Decision::COUNT],
            reproduction_complete: true,
        });
        node
    }

    #[test]
    fn combine_weights_ignore_coin_flips() {
        let a = trained(1, 24, 0.6, 0.01);
        let b = trained(2, 24, 0.8, 0.01);
        let c = trained(3, 24, 0.4, 0.01);
        let w = combine_weights(&[&a, &b, &c]).unwrap();
        assert_approx(w[0], 0.25, DEFAULT_EPSILON);
        assert_approx(w[1], 0.75, DEFAULT_EPSILON);
        assert_eq!(w[2], 0.0);
        assert_approx(combine(&[&a, &b, &c], &[0.04, 0.0, 9.0]).unwrap(), 0.01, DEFAULT_EPSILON);
    }

    #[test]
    fn all_weak_models_are_invalid_state() {
        let a = trained(1, 24, 0.5, 0.01);
        let b = trained(2, 24, 0.3, 0.01);
        assert!(matches!(combine_weights(&[&a, &b]), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn mixed_horizons_are_rejected() {
        let a = trained(1, 24, 0.6, 0.01);
        let b = trained(2, 12, 0.6, 0.01);
        assert!(matches!(combine_weights(&[&a, &b]), Err(CoreError::InvalidArgument(_))));
        assert!(combine(&[&a], &[0.1, 0.2]).is_err());
    }

    #[test]
    fn groups_are_keyed_by_horizon() {
        let a = trained(1, 24, 0.6, 0.01);
        let b = trained(2, 6, 0.6, 0.01);
        let c = trained(3, 24, 0.7, 0.01);
        let groups = group_by_horizon(&[&a, &b, &c]);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![6, 24]);
        assert_eq!(groups[&24].len(), 2);
    }

    #[test]
    fn group_weights_favour_precise_quiet_groups() {
        let a = trained(1, 6, 0.6, 0.01);
        let b = trained(2, 24, 0.6, 0.02);
        let groups = group_by_horizon(&[&a, &b]);
        let w = group_weights(&groups).unwrap();
        // equal precision, stddev doubled -> weight / 64
        assert_approx(w[0], 64.0 / 65.0, 1e-12);
        assert_approx(w[1], 1.0 / 65.0, 1e-12);
        assert_approx(
            weighted_precision(&[&a, &b]).unwrap(),
            0.6,
            1e-12,
        );
    }

    #[test]
    fn long_horizon_projects_the_oldest_sample_in_range() {
        let medians = vec![1.0, 1.1, 1.2, 1.3, 1.4];
        let wfp = vec![0.5, 0.1, 0.2];
        // offset = 5 - 1 - 3 = 1, horizon 48 covers all samples -> start 0
        let got = estimate_price(48, &wfp, &medians).unwrap();
        assert_approx(got, 1.1 * 0.5f64.exp(), DEFAULT_EPSILON);
    }

    #[test]
    fn short_horizon_smooths_projections() {
        let medians = vec![1.0; 10];
        let wfp = vec![0.0, 0.0, 0.0, 0.1, 0.2];
        // horizon 2 -> start 3, projections e^0.1, e^0.2, EMA span 2 (k = 2/3)
        let got = estimate_price(2, &wfp, &medians).unwrap();
        let (p0, p1) = (0.1f64.exp(), 0.2f64.exp());
        assert_approx(got, p0 + (p1 - p0) * 2.0 / 3.0, 1e-12);
    }

    #[test]
    fn estimate_reads_only_the_newest_prices() {
        let wfp = [0.01, -0.02, 0.03];
        let medians: Vec<f64> = (0..50).map(|i| 1.0 + f64::from(i) * 0.01).collect();
        for horizon in [2, 48] {
            let full = estimate_price(horizon, &wfp, &medians).unwrap();
            let trailing = estimate_price(horizon, &wfp, &medians[medians.len() - 4..]).unwrap();
            assert_eq!(full, trailing);
        }
    }

    #[test]
    fn estimate_needs_enough_prices() {
        assert!(estimate_price(4, &[], &[1.0]).is_err());
        assert!(estimate_price(4, &[0.1, 0.1], &[1.0, 1.0]).is_err());
    }
}
