//! Model forest: nodes, fitted predictors, the registry that owns them, training, and
//! the ensemble algebra the simulation combines their predictions with.

pub mod decision;
pub mod ensemble;
pub mod node;
pub mod predictor;
pub mod registry;
pub mod training;

pub use decision::Decision;
pub use ensemble::{
    average_precision, combine, combine_weights, estimate_price, group_by_horizon,
    group_weights, weighted_precision,
};
pub use node::{ModelKind, ModelNode, NodeStats};
pub use predictor::{BucketClassifier, LinearModel, Predictor};
pub use registry::{ModelRegistry, DRILL_DOWN_PRECISION};
pub use training::{train, train_untrained, TrainingConfig, TrainingReport, TrainingSet};
