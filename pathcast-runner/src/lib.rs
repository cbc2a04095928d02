//! PathCast Runner: forward simulation, back-testing and combination search.
//!
//! This crate builds on `pathcast-core` to provide:
//! - Run configuration loaded from TOML, hashed into a run id
//! - Forward simulation of one cut, tabulated at an output resolution
//! - The weekly full-history back-test, run in parallel on rayon
//! - A per-run CSV cache of aggregated back-test rows
//! - Scoring and the greedy search over enabled model sets

pub mod backtest;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod search;
pub mod simulation;

#[cfg(test)]
pub(crate) mod testing;

pub use backtest::{aggregate, simulate_full_history, window_starts, BacktestEvaluator, BacktestRow};
pub use cache::ResultCache;
pub use config::{BacktestSettings, ConfigError, RunConfig, RunId, SimulationSettings, StoreSource};
pub use error::{SimulationError, SimulationResult};
pub use metrics::{is_better_combination, Score};
pub use search::{
    CombinationEvaluator, CombinationSearch, SearchMove, SearchOutcome, SearchProgress,
    SilentProgress, StdoutProgress,
};
pub use simulation::{
    perform_simulation, ForwardSimulation, RealtimeOutlook, SimulationRow, SimulationTable,
};
