//! Data boundary: feeds, the binary bar format and persistence.

pub mod alphavantage;
pub mod circuit_breaker;
pub mod codec;
pub mod csv_feed;
pub mod persistence;
pub mod provider;
pub mod synthetic;

pub use alphavantage::AlphaVantageFeed;
pub use circuit_breaker::CircuitBreaker;
pub use codec::{decode_bars, encode_bars};
pub use csv_feed::CsvFeed;
pub use persistence::{FilePersistence, MemoryPersistence, Persistence, Table};
pub use provider::{BarFeed, DataError};
pub use synthetic::SyntheticFeed;
