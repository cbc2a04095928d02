//! Full-history back-test: one forward simulation per week, run in parallel, aggregated in
//! window order.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use pathcast_core::domain::{ModelId, Resolution, Timestamp};
use pathcast_core::model::ModelRegistry;
use pathcast_core::store::{MultiResolutionStore, StoreKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::config::BacktestSettings;
use crate::error::{SimulationError, SimulationResult};
use crate::metrics::Score;
use crate::search::CombinationEvaluator;
use crate::simulation::{perform_simulation, SimulationTable};

/// Output bars of each weekly window.
pub const BACKTEST_RESOLUTION: Resolution = Resolution::D1;

/// One step of a window: a real and a simulated day, and how each moved since the day before.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    #[serde(rename = "EndTime")]
    pub end_time: Timestamp,
    #[serde(rename = "RealPrice")]
    pub real_price: f64,
    #[serde(rename = "SimulationPrice")]
    pub simulated_price: f64,
    /// `simulated / real - 1`.
    #[serde(rename = "PDifference")]
    pub p_difference: f64,
    #[serde(rename = "PRealPriceChange")]
    pub real_change: f64,
    #[serde(rename = "PSimulationPriceChange")]
    pub simulated_change: f64,
}

/// `start + k × days` for every `k` that stays at or before `end`.
pub fn window_starts(start: NaiveDateTime, end: NaiveDateTime, days: u32) -> Vec<NaiveDateTime> {
    if days == 0 {
        return Vec::new();
    }
    let step = Duration::days(i64::from(days));
    std::iter::successors(Some(start), |d| d.checked_add_signed(step))
        .take_while(|d| *d <= end)
        .collect()
}

/// Rows of every table with at least two rows, keeping table order. Each table's first row
/// only anchors the changes of its second.
pub fn aggregate(tables: &[SimulationTable]) -> Vec<BacktestRow> {
    let mut rows = Vec::new();
    for table in tables.iter().filter(|t| t.len() >= 2) {
        for pair in table.rows.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            let (Some(real), Some(prev_real)) = (cur.real_price, prev.real_price) else {
                continue;
            };
            rows.push(BacktestRow {
                end_time: cur.end_time,
                real_price: real,
                simulated_price: cur.simulated_price,
                p_difference: cur.simulated_price / real - 1.0,
                real_change: (real / prev_real).ln(),
                simulated_change: (cur.simulated_price / prev.simulated_price).ln(),
            });
        }
    }
    rows
}

/// Simulate every window of `settings` with the models in `ids` and aggregate the results.
///
/// Windows run on the rayon pool. A failing window reports itself and contributes no rows.
pub fn simulate_full_history(
    reference: &MultiResolutionStore,
    registry: &ModelRegistry,
    ids: &[ModelId],
    settings: &BacktestSettings,
) -> SimulationResult<Vec<BacktestRow>> {
    if reference.kind() == StoreKind::Realtime {
        return Err(SimulationError::RealtimeHistory);
    }
    // Populate the slots once, before the workers split them.
    for resolution in Resolution::TRAINING.and_coarser() {
        reference.bars(resolution)?;
    }

    let starts = window_starts(settings.start_time(), settings.end_time(), settings.window_days);
    let hours = settings.window_hours();
    let tables: Vec<SimulationTable> = starts
        .par_iter()
        .map(|&start| perform_simulation(reference, registry, ids, start, hours, BACKTEST_RESOLUTION))
        .collect();
    Ok(aggregate(&tables))
}

/// Scores model sets by back-testing them, reusing cached rows for names seen before.
pub struct BacktestEvaluator<'a> {
    reference: &'a MultiResolutionStore,
    registry: &'a ModelRegistry,
    settings: BacktestSettings,
    cache: ResultCache,
}

impl<'a> BacktestEvaluator<'a> {
    pub fn new(
        reference: &'a MultiResolutionStore,
        registry: &'a ModelRegistry,
        settings: BacktestSettings,
        cache: ResultCache,
    ) -> Self {
        Self {
            reference,
            registry,
            settings,
            cache,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Aggregated rows for `ids`, from the cache when `name` has been simulated already.
    pub fn rows(&self, ids: &[ModelId], name: &str) -> Result<Vec<BacktestRow>> {
        let kind = self.reference.kind();
        if let Some(rows) = self.cache.get(kind, name)? {
            return Ok(rows);
        }
        println!("Starting simulation: {name}");
        let rows = simulate_full_history(self.reference, self.registry, ids, &self.settings)
            .with_context(|| format!("back-test '{name}' failed"))?;
        self.cache.put(kind, name, &rows)?;
        Ok(rows)
    }
}

impl CombinationEvaluator for BacktestEvaluator<'_> {
    fn evaluate(&mut self, ids: &[ModelId], name: &str) -> Result<Score> {
        let rows = self.rows(ids, name)?;
        let nodes = self.registry.nodes_for(ids)?;
        Score::from_rows(&rows, &nodes).with_context(|| format!("cannot score '{name}'"))
    }

    fn clear_cache(&mut self) -> Result<()> {
        self.cache.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationRow;
    use crate::testing::{hour_store, trained_registry};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn table(prices: &[(f64, f64)]) -> SimulationTable {
        SimulationTable {
            name: "t".into(),
            rows: prices
                .iter()
                .enumerate()
                .map(|(i, &(real, sim))| SimulationRow {
                    end_time: i as i64,
                    real_price: Some(real),
                    simulated_price: sim,
                })
                .collect(),
            outlook: None,
        }
    }

    #[test]
    fn windows_step_weekly_up_to_the_end() {
        let starts = window_starts(day(2019, 12, 1), day(2019, 12, 23), 7);
        assert_eq!(
            starts,
            vec![day(2019, 12, 1), day(2019, 12, 8), day(2019, 12, 15), day(2019, 12, 22)]
        );
        assert_eq!(window_starts(day(2019, 12, 1), day(2019, 12, 1), 7).len(), 1);
        assert!(window_starts(day(2019, 12, 2), day(2019, 12, 1), 7).is_empty());
    }

    #[test]
    fn aggregate_skips_short_tables_and_first_rows() {
        let tables = vec![
            table(&[(1.0, 1.0), (1.1, 1.21)]),
            table(&[(2.0, 2.0)]),
            table(&[(1.0, 1.0), (1.0, 0.9), (2.0, 1.8)]),
        ];
        let rows = aggregate(&tables);
        assert_eq!(rows.len(), 3);

        assert!((rows[0].p_difference - 0.1).abs() < 1e-12);
        assert!((rows[0].real_change - 1.1_f64.ln()).abs() < 1e-12);
        assert!((rows[0].simulated_change - 1.21_f64.ln()).abs() < 1e-12);

        assert!((rows[2].p_difference + 0.1).abs() < 1e-12);
        assert!((rows[2].real_change - 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn realtime_stores_are_refused() {
        let registry = ModelRegistry::in_memory();
        let store = MultiResolutionStore::realtime(
            std::sync::Arc::new(pathcast_core::data::SyntheticFeed::new(1, 0, 1)),
            std::sync::Arc::new(pathcast_core::data::MemoryPersistence::new()),
        );
        let result = simulate_full_history(&store, &registry, &[], &BacktestSettings::default());
        assert!(matches!(result, Err(SimulationError::RealtimeHistory)));
    }

    #[test]
    fn full_history_is_ordered_and_tolerates_failed_windows() {
        let reference = hour_store(50);
        let (registry, ids) = trained_registry(&reference);
        // The first window has no history to train on and fails; the rest still run.
        let settings = BacktestSettings {
            start: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(1970, 2, 10).unwrap(),
            window_days: 7,
        };
        let rows = simulate_full_history(&reference, &registry, &ids, &settings).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.windows(2).all(|w| w[0].end_time < w[1].end_time));
        assert!(rows.iter().all(|r| r.p_difference.is_finite()));
    }

    #[test]
    fn evaluator_caches_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = hour_store(50);
        let (registry, ids) = trained_registry(&reference);
        let settings = BacktestSettings {
            start: NaiveDate::from_ymd_opt(1970, 1, 29).unwrap(),
            end: NaiveDate::from_ymd_opt(1970, 2, 12).unwrap(),
            window_days: 7,
        };
        let cache = ResultCache::new(tmp.path(), &"run".to_string()).unwrap();
        let mut evaluator = BacktestEvaluator::new(&reference, &registry, settings, cache);

        let first = evaluator.evaluate(&ids, "").unwrap();
        assert!(evaluator.cache().contains(StoreKind::Historical, ""));
        let again = evaluator.evaluate(&ids, "").unwrap();
        assert_eq!(first, again);

        evaluator.clear_cache().unwrap();
        assert!(evaluator.cache().is_empty().unwrap());
    }
}
