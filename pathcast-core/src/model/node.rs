//! Model node: one entry of the model forest, addressed by id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::decision::Decision;
use crate::domain::{ModelId, Resolution};
use crate::error::{CoreError, CoreResult};
use crate::features::FeatureDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    DecisionBucket,
    Linear,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::DecisionBucket => "decision_bucket",
            ModelKind::Linear => "linear",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decision_bucket" | "bucket" | "j48" => Ok(ModelKind::DecisionBucket),
            "linear" | "linear_regression" => Ok(ModelKind::Linear),
            other => Err(CoreError::invalid_argument(format!("unknown model kind '{other}'"))),
        }
    }
}

/// Statistics computed when a node is trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Cross-validated precision in `[0, 1]`.
    pub precision: f64,
    pub profit_stddev: f64,
    /// Zero for roots, the mean training profit for children.
    pub profit_average: f64,
    pub is_singular: bool,
    /// Profit reported for each decision bucket.
    pub prediction_profits: [f64; Decision::COUNT],
    pub reproduction_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelNode {
    pub id: ModelId,
    pub kind: ModelKind,
    pub resolution: Resolution,
    /// Periods (1h bars) ahead the node predicts.
    pub horizon: usize,
    pub features: Vec<FeatureDescriptor>,
    #[serde(default)]
    pub stats: Option<NodeStats>,
    #[serde(default)]
    pub parent: Option<ModelId>,
    #[serde(default)]
    pub children: [Option<ModelId>; Decision::COUNT],
    /// Explicit 1h training indices; roots train on the default range.
    #[serde(default)]
    pub training_points: Option<Vec<usize>>,
}

impl ModelNode {
    pub fn root(
        id: ModelId,
        kind: ModelKind,
        resolution: Resolution,
        horizon: usize,
        features: Vec<FeatureDescriptor>,
    ) -> Self {
        Self {
            id,
            kind,
            resolution,
            horizon,
            features,
            stats: None,
            parent: None,
            children: [None; Decision::COUNT],
            training_points: None,
        }
    }

    /// A node trained on the rows its parent sorted into one bucket.
    pub fn child_of(parent: &ModelNode, id: ModelId, training_points: Vec<usize>) -> Self {
        Self {
            parent: Some(parent.id),
            training_points: Some(training_points),
            ..Self::root(
                id,
                parent.kind,
                parent.resolution,
                parent.horizon,
                parent.features.clone(),
            )
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_trained(&self) -> bool {
        self.stats.is_some()
    }

    pub fn stats(&self) -> CoreResult<&NodeStats> {
        self.stats
            .as_ref()
            .ok_or_else(|| CoreError::invalid_state(format!("model {} is not trained", self.id)))
    }

    pub fn precision(&self) -> CoreResult<f64> {
        Ok(self.stats()?.precision)
    }

    pub fn profit_stddev(&self) -> CoreResult<f64> {
        Ok(self.stats()?.profit_stddev)
    }

    pub fn child(&self, decision: Decision) -> Option<ModelId> {
        self.children[decision.index()]
    }

    pub fn child_ids(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.children.iter().flatten().copied()
    }

    /// Ids of the models this node's features read.
    pub fn delegate_ids(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.features.iter().filter_map(FeatureDescriptor::delegate_id)
    }

    pub fn decision_profit(&self, decision: Decision) -> CoreResult<f64> {
        Ok(self.stats()?.prediction_profits[decision.index()])
    }
}
