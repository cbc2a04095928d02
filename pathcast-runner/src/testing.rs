//! Fixtures shared by the runner's unit tests.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use pathcast_core::data::{MemoryPersistence, SyntheticFeed};
use pathcast_core::domain::{ModelId, Resolution};
use pathcast_core::model::{train_untrained, ModelKind, ModelNode, ModelRegistry, TrainingConfig};
use pathcast_core::store::MultiResolutionStore;

pub(crate) const SEED: u64 = 11;

/// Historical store over `days` of synthetic minutes starting at the epoch.
pub(crate) fn hour_store(days: u32) -> MultiResolutionStore {
    MultiResolutionStore::historical(
        Arc::new(SyntheticFeed::new(SEED, 0, days)),
        Arc::new(MemoryPersistence::new()),
    )
}

/// Midnight of day 30, late enough for every fixture feature to have history.
pub(crate) fn sim_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 31)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

pub(crate) fn training_config() -> TrainingConfig {
    TrainingConfig {
        warmup_days: 2,
        folds: 4,
        min_child_rows: 1_000_000,
        min_bucket_rows: 5,
    }
}

/// Two trained linear roots with horizons 4 and 12.
///
/// Precisions are pinned above one half afterwards so the ensemble never has zero weight.
pub(crate) fn trained_registry(store: &MultiResolutionStore) -> (ModelRegistry, Vec<ModelId>) {
    let mut registry = ModelRegistry::in_memory();
    let nodes = [
        (1, 4, ["Rsi;14", "LinearRegressionSlope;12"], 0.7),
        (2, 12, ["MeanToStd;24", "MacdHist;40"], 0.65),
    ];
    for (id, horizon, features, _) in &nodes {
        registry
            .register(ModelNode::root(
                ModelId(*id),
                ModelKind::Linear,
                Resolution::H1,
                *horizon,
                features.iter().map(|f| f.parse().unwrap()).collect(),
            ))
            .unwrap();
    }
    train_untrained(&mut registry, store, &training_config()).unwrap();

    for (id, _, _, precision) in &nodes {
        let mut stats = registry.node(ModelId(*id)).unwrap().stats.clone().unwrap();
        stats.precision = *precision;
        stats.profit_stddev = stats.profit_stddev.max(1e-4);
        registry.set_stats(ModelId(*id), Some(stats)).unwrap();
    }
    let ids = nodes.iter().map(|(id, ..)| ModelId(*id)).collect();
    (registry, ids)
}
