//! Integration tests for the path from feed to prediction.
//!
//! Tests:
//! 1. A historical store over a synthetic feed persists every slot it populates
//! 2. Trained models predict from a cursor positioned on the 1h slot
//! 3. A registry saved to disk reloads with its predictors
//! 4. Removing a delegated model is refused; rebuilding forgets training

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use pathcast_core::data::{MemoryPersistence, Persistence, SyntheticFeed};
use pathcast_core::domain::{ModelId, Resolution};
use pathcast_core::model::{train_untrained, ModelKind, ModelNode, ModelRegistry, TrainingConfig};
use pathcast_core::series::TimeCursor;
use pathcast_core::store::MultiResolutionStore;
use pathcast_core::CoreError;

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn scratch_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("pathcast_it_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn historical(days: u32) -> (MultiResolutionStore, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::new());
    let store = MultiResolutionStore::historical(
        Arc::new(SyntheticFeed::new(21, 0, days)),
        persistence.clone(),
    );
    (store, persistence)
}

fn config() -> TrainingConfig {
    TrainingConfig {
        warmup_days: 2,
        folds: 4,
        min_child_rows: 1_000_000,
        min_bucket_rows: 5,
    }
}

fn node(id: u32, kind: ModelKind, horizon: usize, features: &[&str]) -> ModelNode {
    ModelNode::root(
        ModelId(id),
        kind,
        Resolution::H1,
        horizon,
        features.iter().map(|f| f.parse().unwrap()).collect(),
    )
}

fn populated_registry(registry: &mut ModelRegistry) {
    registry
        .register(node(1, ModelKind::Linear, 6, &["Rsi;14", "LinearRegressionSlope;12"]))
        .unwrap();
    registry
        .register(node(2, ModelKind::DecisionBucket, 6, &["MeanToStd;24", "DelegatePrediction;0;1"]))
        .unwrap();
}

fn cursor_at(store: &MultiResolutionStore, hour: usize) -> (TimeCursor, f64) {
    let hours = store.bars(Resolution::H1).unwrap();
    let mut cursor = TimeCursor::new();
    for r in Resolution::H1.and_coarser() {
        cursor.step_before(r, &store.bars(r).unwrap(), hours[hour].start);
    }
    (cursor, f64::from(hours[hour].median))
}

// ──────────────────────────────────────────────
// 1. Store population
// ──────────────────────────────────────────────

#[test]
fn historical_store_persists_consolidated_slots() {
    let (store, persistence) = historical(6);
    assert_eq!(store.count(Resolution::H1).unwrap(), 6 * 24);
    assert_eq!(store.count(Resolution::D1).unwrap(), 6);
    let saved = persistence.load_bars("historical_1h").unwrap();
    assert!(saved.is_some_and(|bars| bars.len() == 6 * 24));
}

// ──────────────────────────────────────────────
// 2. Training and prediction
// ──────────────────────────────────────────────

#[test]
fn trained_models_predict_from_a_cursor() {
    let (store, _) = historical(14);
    let mut registry = ModelRegistry::in_memory();
    populated_registry(&mut registry);

    let reports = train_untrained(&mut registry, &store, &config()).unwrap();
    assert_eq!(reports.len(), 2);

    let (cursor, price) = cursor_at(&store, 14 * 24 - 10);
    for id in [ModelId(1), ModelId(2)] {
        let dfp = registry.predict_dfp(id, &store, price, &cursor).unwrap();
        assert!(dfp.is_some_and(f64::is_finite), "model {id} gave {dfp:?}");
    }

    // Too early for a 24-bar window: no prediction, no error.
    let (early, price) = cursor_at(&store, 5);
    assert_eq!(registry.predict_dfp(ModelId(2), &store, price, &early).unwrap(), None);
}

// ──────────────────────────────────────────────
// 3. Registry persistence
// ──────────────────────────────────────────────

#[test]
fn saved_registry_reloads_lazily() {
    let dir = scratch_dir("reload");
    let (store, _) = historical(14);
    {
        let mut registry = ModelRegistry::open(&dir).unwrap();
        populated_registry(&mut registry);
        train_untrained(&mut registry, &store, &config()).unwrap();
    }

    let registry = ModelRegistry::open(&dir).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.nodes().all(ModelNode::is_trained));
    assert!(!registry.is_loaded(ModelId(1)));

    let (cursor, price) = cursor_at(&store, 300);
    assert!(registry.predict_dfp(ModelId(1), &store, price, &cursor).unwrap().is_some());
    assert!(registry.is_loaded(ModelId(1)));
    let _ = fs::remove_dir_all(&dir);
}

// ──────────────────────────────────────────────
// 4. Removal and rebuild
// ──────────────────────────────────────────────

#[test]
fn delegated_models_cannot_be_removed() {
    let (store, _) = historical(14);
    let mut registry = ModelRegistry::in_memory();
    populated_registry(&mut registry);
    train_untrained(&mut registry, &store, &config()).unwrap();

    assert!(matches!(registry.remove(ModelId(1)), Err(CoreError::InvalidState(_))));
    assert_eq!(registry.remove(ModelId(2)).unwrap(), vec![ModelId(2)]);
    assert!(registry.remove(ModelId(1)).is_ok());
    assert!(registry.is_empty());
}

#[test]
fn rebuild_forgets_training() {
    let (store, _) = historical(14);
    let mut registry = ModelRegistry::in_memory();
    populated_registry(&mut registry);
    train_untrained(&mut registry, &store, &config()).unwrap();

    registry.rebuild(ModelId(2)).unwrap();
    let node = registry.node(ModelId(2)).unwrap();
    assert!(!node.is_trained());
    assert!(!registry.is_loaded(ModelId(2)));
    assert!(registry.node(ModelId(1)).unwrap().is_trained());
}
