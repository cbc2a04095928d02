//! Series algebra over sorted bar sequences.
//!
//! - [`consolidate`]: fold finer bars into fixed-width coarser windows
//! - [`floor`] / [`floor_from`]: timestamp → bar index
//! - [`TimeCursor`]: per-resolution positions for a forward walk

pub mod consolidate;
pub mod time_index;

pub use consolidate::consolidate;
pub use time_index::{floor, floor_from, TimeCursor};
