//! Run configuration, loaded from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration. The run id is a
//! content hash of the whole configuration and names the result cache directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use pathcast_core::data::{
    AlphaVantageFeed, BarFeed, CsvFeed, FilePersistence, Persistence, SyntheticFeed,
};
use pathcast_core::domain::Resolution;
use pathcast_core::model::TrainingConfig;
use pathcast_core::store::MultiResolutionStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a run configuration (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSource {
    /// Yearly minute-bar CSV files.
    Historical,
    /// AlphaVantage EUR/USD.
    Realtime,
    /// Seeded random walk, persisted under `<data_dir>/synthetic`.
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub window_days: u32,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2002, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2019, 12, 23).unwrap_or_default(),
            window_days: 7,
        }
    }
}

impl BacktestSettings {
    pub fn start_time(&self) -> NaiveDateTime {
        self.start.and_time(chrono::NaiveTime::MIN)
    }

    pub fn end_time(&self) -> NaiveDateTime {
        self.end.and_time(chrono::NaiveTime::MIN)
    }

    pub fn window_hours(&self) -> usize {
        self.window_days as usize * 24
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Hours simulated past the cut.
    pub hours: usize,
    pub output_resolution: Resolution,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            hours: 168,
            output_resolution: Resolution::D1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub alphavantage_api_key: Option<String>,
    pub hour_offset: i64,
    pub first_year: i32,
    pub last_year: i32,
    pub synthetic_seed: u64,
    pub synthetic_start: NaiveDate,
    pub synthetic_days: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            alphavantage_api_key: None,
            hour_offset: 6,
            first_year: 2000,
            last_year: 2020,
            synthetic_seed: 42,
            synthetic_start: NaiveDate::from_ymd_opt(2001, 1, 1).unwrap_or_default(),
            synthetic_days: 730,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Raw CSV years live in `<data_dir>/raw`, persisted bars and tables next to them.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model_dir: PathBuf,
    pub store: StoreSource,
    pub backtest: BacktestSettings,
    pub simulation: SimulationSettings,
    pub feed: FeedSettings,
    pub training: TrainingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            model_dir: PathBuf::from("models"),
            store: StoreSource::Historical,
            backtest: BacktestSettings::default(),
            simulation: SimulationSettings::default(),
            feed: FeedSettings::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backtest.start > self.backtest.end {
            return Err(ConfigError::Invalid(format!(
                "backtest.start {} is after backtest.end {}",
                self.backtest.start, self.backtest.end
            )));
        }
        if self.backtest.window_days == 0 {
            return Err(ConfigError::Invalid("backtest.window_days must be positive".into()));
        }
        if self.simulation.hours == 0 {
            return Err(ConfigError::Invalid("simulation.hours must be positive".into()));
        }
        if self.simulation.output_resolution > Resolution::TRAINING {
            return Err(ConfigError::Invalid(format!(
                "simulation.output_resolution {} is finer than the {} simulation step",
                self.simulation.output_resolution,
                Resolution::TRAINING
            )));
        }
        if self.feed.first_year > self.feed.last_year {
            return Err(ConfigError::Invalid("feed.first_year is after feed.last_year".into()));
        }
        if self.training.folds < 2 {
            return Err(ConfigError::Invalid("training.folds must be at least 2".into()));
        }
        Ok(())
    }

    /// Computes a deterministic hash ID for this configuration.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)
            .map_err(|e| ConfigError::Invalid(format!("config serialization: {e}")))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        match self.store {
            StoreSource::Synthetic => Arc::new(FilePersistence::new(self.data_dir.join("synthetic"))),
            _ => Arc::new(FilePersistence::new(&self.data_dir)),
        }
    }

    /// The reference store the configuration describes: historical CSV bars, the realtime
    /// API, or a synthetic walk.
    pub fn open_store(&self, persistence: Arc<dyn Persistence>) -> Result<MultiResolutionStore, ConfigError> {
        Ok(match self.store {
            StoreSource::Historical => MultiResolutionStore::historical(self.csv_feed(), persistence),
            StoreSource::Synthetic => {
                MultiResolutionStore::historical(self.synthetic_feed(), persistence)
            }
            StoreSource::Realtime => {
                let key = self.feed.alphavantage_api_key.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("feed.alphavantage_api_key is required for a realtime store".into())
                })?;
                let feed = AlphaVantageFeed::new(key)
                    .map_err(|e| ConfigError::Invalid(format!("realtime feed: {e}")))?;
                MultiResolutionStore::realtime(Arc::new(feed), persistence)
            }
        })
    }

    /// Historical store the realtime consistency checks compare against.
    pub fn open_historical_store(&self, persistence: Arc<dyn Persistence>) -> MultiResolutionStore {
        MultiResolutionStore::historical(self.csv_feed(), persistence)
    }

    fn csv_feed(&self) -> Arc<dyn BarFeed> {
        Arc::new(
            CsvFeed::new(self.data_dir.join("raw"), self.feed.first_year, self.feed.last_year)
                .with_hour_offset(self.feed.hour_offset),
        )
    }

    fn synthetic_feed(&self) -> Arc<dyn BarFeed> {
        let start = self
            .feed
            .synthetic_start
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();
        Arc::new(SyntheticFeed::new(
            self.feed.synthetic_seed,
            start,
            self.feed.synthetic_days,
        ))
    }
}
