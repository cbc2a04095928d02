//! Training: fit a node's predictor on 1h history and compute its statistics.
//!
//! Rows are built at each training point `i` of the 1h slot: cursors sit one bar before the
//! bar containing `H1[i].start`, the current price is `H1[i].median`, and the target is the
//! log change of the median `horizon` bars later. Rows without a full feature vector are
//! skipped. Precision comes from k-fold cross-validation over contiguous folds.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::node::{ModelKind, ModelNode, NodeStats};
use super::predictor::{BucketClassifier, LinearModel, Predictor};
use super::registry::ModelRegistry;
use crate::domain::{ModelId, Resolution};
use crate::error::{CoreError, CoreResult};
use crate::features::FeatureEngine;
use crate::indicators::stats;
use crate::series::TimeCursor;
use crate::store::MultiResolutionStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Days of 1h bars skipped before the first default training point.
    pub warmup_days: usize,
    pub folds: usize,
    /// Rows a bucket needs before it spawns a child.
    pub min_child_rows: usize,
    /// Rows a bucket needs before its own mean profit replaces the stddev-band profit.
    pub min_bucket_rows: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            warmup_days: 300,
            folds: 10,
            min_child_rows: 1000,
            min_bucket_rows: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub id: ModelId,
    pub rows: usize,
    pub precision: f64,
    pub children: Vec<ModelId>,
}

/// Feature rows with their training point and realized future profit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub points: Vec<usize>,
    pub rows: Vec<Vec<f64>>,
    pub profits: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 1h indices `[warmup_days * 24, count - horizon)`.
pub fn default_training_points(count: usize, horizon: usize, config: &TrainingConfig) -> Range<usize> {
    let warmup = config.warmup_days * Resolution::TRAINING.periods_per_day() as usize;
    warmup..count.saturating_sub(horizon).max(warmup)
}

pub fn training_set(
    registry: &ModelRegistry,
    store: &MultiResolutionStore,
    node: &ModelNode,
    config: &TrainingConfig,
) -> CoreResult<TrainingSet> {
    let hours = store.bars(Resolution::TRAINING)?;
    let limit = hours.len().saturating_sub(node.horizon);
    let points: Vec<usize> = match &node.training_points {
        Some(points) => points.iter().copied().filter(|&i| i < limit).collect(),
        None => default_training_points(hours.len(), node.horizon, config).collect(),
    };

    let medians: Vec<f64> = hours.iter().map(|b| f64::from(b.median)).collect();
    let future = stats::future_profits(&medians, node.horizon);
    let slots = Resolution::TRAINING
        .and_coarser()
        .map(|r| store.bars(r).map(|bars| (r, bars)))
        .collect::<CoreResult<Vec<_>>>()?;

    let engine = FeatureEngine::new(store, registry);
    let mut cursor = TimeCursor::new();
    let mut set = TrainingSet::default();
    for i in points {
        let time = hours[i].start;
        for (resolution, bars) in &slots {
            cursor.step_before(*resolution, bars, time);
        }
        let Some(row) = engine.evaluate(&node.features, node.resolution, medians[i], &cursor)? else {
            continue;
        };
        set.points.push(i);
        set.rows.push(row);
        set.profits.push(future[i]);
    }
    Ok(set)
}

/// Contiguous, near-equal folds covering `0..n`.
fn folds(n: usize, k: usize) -> Vec<Range<usize>> {
    (0..k).map(|f| f * n / k..(f + 1) * n / k).collect()
}

fn without<T: Clone>(items: &[T], hole: &Range<usize>) -> Vec<T> {
    items[..hole.start]
        .iter()
        .chain(&items[hole.end..])
        .cloned()
        .collect()
}

/// Fraction of held-out rows whose bucket is predicted correctly.
pub fn cross_validate_buckets(rows: &[Vec<f64>], labels: &[Decision], k: usize) -> CoreResult<f64> {
    let mut correct = 0usize;
    for fold in folds(rows.len(), k) {
        let model = BucketClassifier::fit(&without(rows, &fold), &without(labels, &fold))?;
        for i in fold {
            if model.classify(&rows[i])? == labels[i] {
                correct += 1;
            }
        }
    }
    Ok(correct as f64 / rows.len() as f64)
}

/// Squared correlation between held-out profits and `exp(prediction) - 1`.
pub fn cross_validate_linear(rows: &[Vec<f64>], profits: &[f64], k: usize) -> CoreResult<f64> {
    let mut predicted = Vec::with_capacity(rows.len());
    let mut actual = Vec::with_capacity(rows.len());
    for fold in folds(rows.len(), k) {
        let model = LinearModel::fit(&without(rows, &fold), &without(profits, &fold))?;
        for i in fold {
            predicted.push(model.predict(&rows[i])?.exp() - 1.0);
            actual.push(profits[i]);
        }
    }
    Ok(stats::correlation(&actual, &predicted)?.powi(2))
}

/// Buckets predicted for at least `min_rows` rows, with the training points that fell in.
pub fn child_buckets(
    predicted: &[Decision],
    points: &[usize],
    min_rows: usize,
) -> Vec<(Decision, Vec<usize>)> {
    Decision::ALL
        .iter()
        .filter_map(|&d| {
            let members: Vec<usize> = predicted
                .iter()
                .zip(points)
                .filter(|(p, _)| **p == d)
                .map(|(_, &i)| i)
                .collect();
            (members.len() >= min_rows.max(1)).then_some((d, members))
        })
        .collect()
}

struct Fitted {
    predictor: Predictor,
    stats: NodeStats,
    spawn: Vec<(Decision, Vec<usize>)>,
}

fn fit_node(node: &ModelNode, set: &TrainingSet, config: &TrainingConfig) -> CoreResult<Fitted> {
    let average = stats::mean(&set.profits)?;
    let stddev = stats::std_dev(&set.profits)?;
    let profit_average = if node.is_root() { 0.0 } else { average };
    let banded = Decision::ALL.map(|d| d.to_profit(stddev, profit_average));

    match node.kind {
        ModelKind::Linear => {
            let precision = cross_validate_linear(&set.rows, &set.profits, config.folds)?;
            Ok(Fitted {
                predictor: Predictor::Linear(LinearModel::fit(&set.rows, &set.profits)?),
                stats: NodeStats {
                    precision,
                    profit_stddev: stddev,
                    profit_average,
                    is_singular: false,
                    prediction_profits: banded,
                    reproduction_complete: true,
                },
                spawn: Vec::new(),
            })
        }
        ModelKind::DecisionBucket => {
            let labels: Vec<Decision> = set
                .profits
                .iter()
                .map(|&p| Decision::from_profit(p, stddev, average))
                .collect();
            let precision = cross_validate_buckets(&set.rows, &labels, config.folds)?;
            let classifier = BucketClassifier::fit(&set.rows, &labels)?;
            let predicted = set
                .rows
                .iter()
                .map(|r| classifier.classify(r))
                .collect::<CoreResult<Vec<_>>>()?;

            let is_singular = predicted.iter().collect::<BTreeSet<_>>().len() <= 1;
            let mut prediction_profits = banded;
            for d in Decision::ALL {
                let hits: Vec<f64> = predicted
                    .iter()
                    .zip(&set.profits)
                    .filter(|(p, _)| **p == d)
                    .map(|(_, &profit)| profit)
                    .collect();
                if hits.len() >= config.min_bucket_rows.max(1) {
                    prediction_profits[d.index()] = stats::mean(&hits)?;
                }
            }

            let spawn = if precision > super::registry::DRILL_DOWN_PRECISION && !is_singular {
                child_buckets(&predicted, &set.points, config.min_child_rows)
                    .into_iter()
                    .filter(|(d, _)| node.child(*d).is_none())
                    .collect()
            } else {
                Vec::new()
            };

            Ok(Fitted {
                predictor: Predictor::DecisionBucket(classifier),
                stats: NodeStats {
                    precision,
                    profit_stddev: stddev,
                    profit_average,
                    is_singular,
                    prediction_profits,
                    reproduction_complete: true,
                },
                spawn,
            })
        }
    }
}

/// Train `id`, store its predictor and statistics, and register any children it spawns.
pub fn train(
    registry: &mut ModelRegistry,
    store: &MultiResolutionStore,
    id: ModelId,
    config: &TrainingConfig,
) -> CoreResult<TrainingReport> {
    if config.folds < 2 {
        return Err(CoreError::invalid_argument("cross-validation needs at least 2 folds"));
    }
    let node = registry.node(id)?.clone();
    let set = training_set(registry, store, &node, config)?;
    if set.len() < 2 * config.folds {
        return Err(CoreError::invalid_state(format!(
            "model {id} has only {} usable training rows",
            set.len()
        )));
    }
    let fitted = fit_node(&node, &set, config)?;

    registry.set_predictor(id, fitted.predictor)?;
    let precision = fitted.stats.precision;
    registry.set_stats(id, Some(fitted.stats))?;

    let mut children = Vec::with_capacity(fitted.spawn.len());
    for (decision, points) in fitted.spawn {
        let child = registry.next_id();
        registry.register(ModelNode::child_of(&node, child, points))?;
        registry.attach_child(id, decision, child)?;
        children.push(child);
    }
    registry.save()?;

    Ok(TrainingReport {
        id,
        rows: set.len(),
        precision,
        children,
    })
}

/// Train every untrained node, delegates before the models reading them. Children spawned
/// along the way are trained too.
pub fn train_untrained(
    registry: &mut ModelRegistry,
    store: &MultiResolutionStore,
    config: &TrainingConfig,
) -> CoreResult<Vec<TrainingReport>> {
    let mut reports = Vec::new();
    loop {
        let ready = registry.nodes().find(|n| {
            !n.is_trained()
                && n.delegate_ids()
                    .all(|d| registry.node(d).is_ok_and(ModelNode::is_trained))
        });
        let Some(id) = ready.map(|n| n.id) else {
            break;
        };
        reports.push(train(registry, store, id, config)?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BarFeed, SyntheticFeed};

    fn store(days: u32) -> MultiResolutionStore {
        let feed = SyntheticFeed::new(5, 0, days);
        let store = MultiResolutionStore::custom();
        store
            .set_bars(Resolution::H1, feed.fetch(Resolution::H1).unwrap())
            .unwrap();
        store
            .set_bars(Resolution::D1, feed.fetch(Resolution::D1).unwrap())
            .unwrap();
        store
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            warmup_days: 1,
            folds: 5,
            min_child_rows: 100_000,
            min_bucket_rows: 10,
        }
    }

    fn root(id: u32, kind: ModelKind) -> ModelNode {
        ModelNode::root(
            ModelId(id),
            kind,
            Resolution::H1,
            4,
            vec!["Rsi;14".parse().unwrap(), "LinearRegressionSlope;10".parse().unwrap()],
        )
    }

    #[test]
    fn default_points_skip_warmup_and_the_horizon_tail() {
        let cfg = TrainingConfig::default();
        assert_eq!(default_training_points(10_000, 24, &cfg), 7200..9976);
        assert!(default_training_points(100, 24, &cfg).is_empty());
    }

    #[test]
    fn training_rows_align_with_future_profits() {
        let store = store(10);
        let mut registry = ModelRegistry::in_memory();
        registry.register(root(1, ModelKind::Linear)).unwrap();
        let node = registry.node(ModelId(1)).unwrap().clone();
        let set = training_set(&registry, &store, &node, &config()).unwrap();

        let hours = store.bars(Resolution::H1).unwrap();
        assert_eq!(*set.points.first().unwrap(), 24);
        assert_eq!(*set.points.last().unwrap(), hours.len() - 5);
        let i = set.points[3];
        let expected = (f64::from(hours[i + 4].median) / f64::from(hours[i].median)).ln();
        assert!((set.profits[3] - expected).abs() < 1e-12);
        assert!(set.rows.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn explicit_points_past_the_horizon_are_dropped() {
        let store = store(3);
        let registry = ModelRegistry::in_memory();
        let mut node = root(1, ModelKind::Linear);
        node.training_points = Some(vec![30, 40, 70, 71]);
        let set = training_set(&registry, &store, &node, &config()).unwrap();
        assert_eq!(set.points, vec![30, 40]);
    }

    #[test]
    fn linear_training_stores_stats_and_predictor() {
        let store = store(12);
        let mut registry = ModelRegistry::in_memory();
        registry.register(root(1, ModelKind::Linear)).unwrap();
        let report = train(&mut registry, &store, ModelId(1), &config()).unwrap();

        let node = registry.node(ModelId(1)).unwrap();
        let stats = node.stats().unwrap();
        assert!((0.0..=1.0).contains(&stats.precision));
        assert_eq!(stats.profit_average, 0.0);
        assert!(stats.profit_stddev > 0.0);
        assert_eq!(report.precision, stats.precision);
        assert!(report.children.is_empty());
        assert!(registry.is_loaded(ModelId(1)));
    }

    #[test]
    fn bucket_training_fills_every_bucket_profit() {
        let store = store(12);
        let mut registry = ModelRegistry::in_memory();
        registry.register(root(1, ModelKind::DecisionBucket)).unwrap();
        train(&mut registry, &store, ModelId(1), &config()).unwrap();
        let stats = registry.node(ModelId(1)).unwrap().stats().unwrap().clone();
        assert!(stats.prediction_profits.iter().all(|p| p.is_finite()));
        assert!(stats.reproduction_complete);
    }

    #[test]
    fn too_little_history_is_invalid_state() {
        let store = store(1);
        let mut registry = ModelRegistry::in_memory();
        registry.register(root(1, ModelKind::Linear)).unwrap();
        assert!(matches!(
            train(&mut registry, &store, ModelId(1), &config()),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn delegates_train_first() {
        let store = store(12);
        let mut registry = ModelRegistry::in_memory();
        registry.register(root(1, ModelKind::Linear)).unwrap();
        let mut reader = root(2, ModelKind::Linear);
        reader.features.push("DelegatePrediction;0;1".parse().unwrap());
        registry.register(reader).unwrap();

        let reports = train_untrained(&mut registry, &store, &config()).unwrap();
        let order: Vec<ModelId> = reports.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![ModelId(1), ModelId(2)]);
        assert!(registry.nodes().all(ModelNode::is_trained));
    }

    #[test]
    fn child_buckets_respect_the_row_minimum() {
        let predicted = [
            Decision::Buy,
            Decision::Sell,
            Decision::Buy,
            Decision::Buy,
            Decision::Sell,
        ];
        let points = [10, 11, 12, 13, 14];
        let got = child_buckets(&predicted, &points, 3);
        assert_eq!(got, vec![(Decision::Buy, vec![10, 12, 13])]);
        assert_eq!(child_buckets(&predicted, &points, 2).len(), 2);
    }

    #[test]
    fn folds_cover_every_row_once() {
        let f = folds(23, 5);
        assert_eq!(f.len(), 5);
        assert_eq!(f.first().unwrap().start, 0);
        assert_eq!(f.last().unwrap().end, 23);
        assert!(f.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn perfectly_separable_buckets_score_full_precision() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let buy = i % 2 == 0;
            rows.push(vec![if buy { 1.0 } else { -1.0 }, i as f64 * 1e-3]);
            labels.push(if buy { Decision::Buy } else { Decision::Sell });
        }
        assert_eq!(cross_validate_buckets(&rows, &labels, 4).unwrap(), 1.0);
    }
}
