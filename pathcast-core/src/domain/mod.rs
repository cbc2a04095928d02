//! Domain types: bars, resolutions, model ids.

pub mod bar;
pub mod ids;
pub mod resolution;

pub use bar::{Bar, Price, Timestamp};
pub use ids::ModelId;
pub use resolution::{Resolution, MS_PER_DAY};
