//! Feed trait and structured error types for everything that touches the outside world.
//!
//! The `BarFeed` trait abstracts over bar sources (yearly CSV files, the Alpha Vantage
//! API, a seeded random walk) so the store can populate slots without knowing where
//! the bars come from, and tests can swap in an offline source.

use thiserror::Error;

use crate::domain::{Bar, Resolution};

/// Structured error types for feed and persistence operations.
///
/// The core never recovers from these; they propagate to the calling shell.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: provider refused requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("{source_name} does not serve {resolution} bars")]
    Unsupported {
        source_name: String,
        resolution: Resolution,
    },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A source of ordered bars and of the latest traded price.
pub trait BarFeed: Send + Sync {
    /// Human-readable name of this feed.
    fn name(&self) -> &str;

    /// All bars the feed has for `resolution`, ascending by start.
    fn fetch(&self, resolution: Resolution) -> Result<Vec<Bar>, DataError>;

    /// Latest price, for realtime simulations.
    fn fetch_current_price(&self) -> Result<f64, DataError>;
}

/// Keep only bars that start strictly after their predecessor.
///
/// Out-of-order and duplicate rows are reported and dropped, so slot invariants hold.
pub fn retain_ascending(source: &str, bars: Vec<Bar>) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    let mut dropped = 0usize;
    for bar in bars {
        match out.last() {
            Some(prev) if bar.start <= prev.end => dropped += 1,
            _ => out.push(bar),
        }
    }
    if dropped > 0 {
        eprintln!("WARNING: {source}: dropped {dropped} overlapping or out-of-order bars");
    }
    out
}
