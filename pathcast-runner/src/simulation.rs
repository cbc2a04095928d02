//! Forward simulation: extend a store hour by hour with the prices the enabled models imply.
//!
//! The walk is autoregressive. Each synthetic 1h bar is inserted into the result store, so
//! the next step's features already see it as history.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDateTime};
use pathcast_core::data::{DataError, Table};
use pathcast_core::domain::{Bar, ModelId, Price, Resolution, Timestamp};
use pathcast_core::indicators::stats;
use pathcast_core::model::{
    combine, estimate_price, group_by_horizon, group_weights, ModelNode, ModelRegistry,
};
use pathcast_core::series::{floor, TimeCursor};
use pathcast_core::store::{MultiResolutionStore, StoreKind};
use pathcast_core::CoreError;

use crate::error::SimulationResult;

/// Synthetic bars are clamped to `anchor × (1 ± CLAMP_SIGMAS × σ)`.
pub const CLAMP_SIGMAS: f64 = 3.0;

/// Hours summarized by the realtime outlook's median.
pub const OUTLOOK_HOURS: usize = 24;

/// Enabled models grouped by horizon, with everything a walk needs precomputed.
pub struct ForwardSimulation<'a> {
    registry: &'a ModelRegistry,
    groups: BTreeMap<usize, Vec<&'a ModelNode>>,
    weights: Vec<f64>,
    /// Standard deviation of first differences of the reference 1h medians.
    sigma: f64,
}

impl<'a> ForwardSimulation<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        ids: &[ModelId],
        reference: &MultiResolutionStore,
    ) -> SimulationResult<Self> {
        let nodes = registry.nodes_for(ids)?;
        if nodes.is_empty() {
            return Err(CoreError::invalid_state("no model is enabled").into());
        }
        let groups = group_by_horizon(&nodes);
        let weights = group_weights(&groups)?;

        let medians: Vec<f64> = reference
            .bars(Resolution::TRAINING)?
            .iter()
            .map(|b| f64::from(b.median))
            .collect();
        let steps = stats::differences(&medians);
        let sigma = if steps.is_empty() { 0.0 } else { stats::std_dev(&steps)? };

        Ok(Self {
            registry,
            groups,
            weights,
            sigma,
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    fn longest_horizon(&self) -> usize {
        self.groups.keys().next_back().copied().unwrap_or(0)
    }

    /// Append `hours + 1` synthetic 1h bars to `store`.
    ///
    /// WFP samples start `horizon + 1` bars before the historical tail, so every group has
    /// a full window by the time the first synthetic bar is priced.
    pub fn run(&self, store: &mut MultiResolutionStore, hours: usize) -> SimulationResult<()> {
        let initial = store.count(Resolution::TRAINING)?;
        if initial == 0 {
            return Err(CoreError::invalid_argument("cannot simulate forward from an empty store").into());
        }
        let first = initial.saturating_sub(self.longest_horizon() + 1).max(1);
        let last = initial + hours - 1;

        let mut wfp: BTreeMap<usize, Vec<f64>> =
            self.groups.keys().map(|&h| (h, Vec::new())).collect();
        let mut cursor = TimeCursor::new();

        for i in first..=last {
            // No slot snapshot may outlive this statement, or `insert` copies the whole slot.
            let now = store
                .bars(Resolution::TRAINING)?
                .get(i)
                .copied()
                .ok_or_else(|| CoreError::invalid_state(format!("simulated bar {i} is missing")))?;
            for resolution in Resolution::TRAINING.and_coarser() {
                cursor.step_before(resolution, &store.bars(resolution)?, now.start);
            }
            let price = f64::from(now.median);

            for (&horizon, members) in &self.groups {
                if i + horizon + 1 < initial {
                    continue;
                }
                let dfps = members
                    .iter()
                    .map(|node| {
                        self.registry
                            .predict_dfp(node.id, store, price, &cursor)?
                            .ok_or_else(|| {
                                CoreError::invalid_state(format!(
                                    "model {} lacks history at simulated bar {i}",
                                    node.id
                                ))
                            })
                    })
                    .collect::<Result<Vec<f64>, CoreError>>()?;
                if let Some(series) = wfp.get_mut(&horizon) {
                    series.push(combine(members, &dfps)?);
                }
            }

            if i + 1 >= initial {
                let bar = self.next_bar(store, &wfp)?;
                store.insert(bar, Resolution::TRAINING)?;
            }
        }
        Ok(())
    }

    fn next_bar(
        &self,
        store: &MultiResolutionStore,
        wfp: &BTreeMap<usize, Vec<f64>>,
    ) -> SimulationResult<Bar> {
        let hours = store.bars(Resolution::TRAINING)?;
        let last = hours
            .last()
            .copied()
            .ok_or_else(|| CoreError::invalid_state("store lost its 1h bars"))?;

        // Each group projects from the `len + 1` newest medians only.
        let estimates = wfp
            .iter()
            .map(|(&horizon, series)| {
                let from = hours.len().saturating_sub(series.len() + 1);
                let medians: Vec<f64> = hours[from..].iter().map(|b| f64::from(b.median)).collect();
                estimate_price(horizon, series, &medians)
            })
            .collect::<Result<Vec<f64>, CoreError>>()?;
        let target = stats::weighted_mean(&estimates, &self.weights)?;

        let anchor = f64::from(last.close);
        let band = CLAMP_SIGMAS * self.sigma;
        let target = stats::clamp(target, anchor * (1.0 - band), anchor * (1.0 + band));

        let start = last.end + 1;
        let open = last.close;
        let close = target as Price;
        Ok(Bar::new(
            start,
            start + Resolution::TRAINING.duration_ms() - 1,
            open,
            close,
            open.max(close),
            open.min(close),
            close,
        )?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationRow {
    pub end_time: Timestamp,
    /// Absent for realtime stores, whose future is unknown.
    pub real_price: Option<f64>,
    pub simulated_price: f64,
}

/// Summary of a realtime run's simulated 1h medians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealtimeOutlook {
    /// Median of the first 24 simulated hours.
    pub next_day_median: f64,
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTable {
    pub name: String,
    pub rows: Vec<SimulationRow>,
    pub outlook: Option<RealtimeOutlook>,
}

impl SimulationTable {
    pub fn name_for(kind: StoreKind, start: NaiveDateTime, hours: usize) -> String {
        format!(
            "{}Simulation_{}_{}_{}_{hours}",
            kind.label(),
            start.year(),
            start.month(),
            start.day()
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as a persistence table: `EndTime`, `RealPrice` (when known), `SimulationPrice`.
    pub fn to_table(&self) -> Result<Table, DataError> {
        let realtime = self.rows.iter().any(|r| r.real_price.is_none());
        let columns: &[&str] = if realtime {
            &["EndTime", "SimulationPrice"]
        } else {
            &["EndTime", "RealPrice", "SimulationPrice"]
        };
        let mut table = Table::new(&self.name, columns);
        for row in &self.rows {
            let mut values = vec![row.end_time as f64];
            if !realtime {
                values.extend(row.real_price);
            }
            values.push(row.simulated_price);
            table.push_row(values)?;
        }
        Ok(table)
    }
}

pub fn timestamp_of(time: NaiveDateTime) -> Timestamp {
    time.and_utc().timestamp_millis()
}

pub fn datetime_of(ms: Timestamp) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|t| t.naive_utc())
}

/// Simulate `hours` past `start` and tabulate `output` bars from the cut onwards.
///
/// Failures are reported on stderr and yield whatever rows were produced, possibly none.
pub fn perform_simulation(
    reference: &MultiResolutionStore,
    registry: &ModelRegistry,
    ids: &[ModelId],
    start: NaiveDateTime,
    hours: usize,
    output: Resolution,
) -> SimulationTable {
    let mut table = SimulationTable {
        name: SimulationTable::name_for(reference.kind(), start, hours),
        rows: Vec::new(),
        outlook: None,
    };
    if let Err(e) = simulate_into(&mut table, reference, registry, ids, start, hours, output) {
        eprintln!("WARNING: simulation {} failed: {e}", table.name);
    }
    table
}

fn simulate_into(
    table: &mut SimulationTable,
    reference: &MultiResolutionStore,
    registry: &ModelRegistry,
    ids: &[ModelId],
    start: NaiveDateTime,
    hours: usize,
    output: Resolution,
) -> SimulationResult<()> {
    let at = timestamp_of(start);
    let (mut results, _) = reference.split(at, Resolution::TRAINING)?;
    let first_row = results.count(output)?;

    ForwardSimulation::new(registry, ids, reference)?.run(&mut results, hours)?;

    let realtime = reference.kind() == StoreKind::Realtime;
    let simulated = results.bars(output)?;
    let real = reference.bars(output)?;
    let end = if realtime {
        simulated.len()
    } else {
        simulated.len().min(real.len())
    };
    for i in first_row..end {
        table.rows.push(SimulationRow {
            end_time: simulated[i].end,
            real_price: (!realtime).then(|| f64::from(real[i].median)),
            simulated_price: f64::from(simulated[i].median),
        });
    }

    if realtime {
        table.outlook = Some(outlook(&results.bars(Resolution::TRAINING)?, at)?);
    }
    Ok(())
}

fn outlook(hours: &[Bar], at: Timestamp) -> SimulationResult<RealtimeOutlook> {
    let from = floor(hours, at)?;
    let medians: Vec<f64> = hours[from..].iter().map(|b| f64::from(b.median)).collect();
    let next_day = &medians[..medians.len().min(OUTLOOK_HOURS)];
    Ok(RealtimeOutlook {
        next_day_median: stats::median(next_day)?,
        high: medians.iter().copied().fold(f64::MIN, f64::max),
        low: medians.iter().copied().fold(f64::MAX, f64::min),
    })
}
