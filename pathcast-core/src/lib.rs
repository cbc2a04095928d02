//! PathCast Core: multi-resolution price store, feature engine and model forest.
//!
//! This crate holds everything a forward simulation reads from:
//! - Domain types (bars, resolutions, model ids)
//! - Series algebra: consolidation, timestamp floor, forward cursors
//! - The multi-resolution store with lazy, persisted population
//! - Feed adapters and the binary bar format
//! - Indicators and the feature engine turning bars into model inputs
//! - Model nodes, predictors, training and the ensemble algebra

pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod indicators;
pub mod model;
pub mod series;
pub mod store;

pub use error::{CoreError, CoreResult};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner shares across rayon workers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Resolution>();
        require_sync::<domain::Resolution>();
        require_send::<domain::ModelId>();
        require_sync::<domain::ModelId>();

        require_send::<store::MultiResolutionStore>();
        require_sync::<store::MultiResolutionStore>();
        require_send::<series::TimeCursor>();
        require_sync::<series::TimeCursor>();

        require_send::<model::ModelRegistry>();
        require_sync::<model::ModelRegistry>();
        require_send::<model::ModelNode>();
        require_sync::<model::ModelNode>();
        require_send::<model::Predictor>();
        require_sync::<model::Predictor>();

        require_send::<data::FilePersistence>();
        require_sync::<data::FilePersistence>();
        require_send::<data::MemoryPersistence>();
        require_sync::<data::MemoryPersistence>();
        require_send::<error::CoreError>();
        require_sync::<error::CoreError>();
    }

    /// The feature engine only ever sees models through the `Delegate` seam.
    #[test]
    fn registry_is_a_feature_delegate() {
        fn _as_delegate(registry: &model::ModelRegistry) -> &dyn features::Delegate {
            registry
        }
    }
}
