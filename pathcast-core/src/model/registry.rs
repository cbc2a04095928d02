//! Model registry: the arena holding every model node, keyed by id.
//!
//! Nodes refer to each other only by id (parent, child buckets, delegated features), so the
//! forest serializes as a flat list in `registry.json`. Fitted predictors live next to it as
//! `model_<id>.json` and are loaded on first use, at most once per node, under that node's
//! own mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::decision::Decision;
use super::node::{ModelNode, NodeStats};
use super::predictor::Predictor;
use crate::data::persistence::write_atomic;
use crate::data::DataError;
use crate::domain::{ModelId, Resolution};
use crate::error::{CoreError, CoreResult};
use crate::features::{Delegate, FeatureEngine};
use crate::series::TimeCursor;
use crate::store::MultiResolutionStore;

/// A bucket prediction is handed to the bucket's child only above this precision.
pub const DRILL_DOWN_PRECISION: f64 = 0.5;

const REGISTRY_FILE: &str = "registry.json";

struct NodeEntry {
    node: ModelNode,
    predictor: Mutex<Option<Arc<Predictor>>>,
}

impl NodeEntry {
    fn new(node: ModelNode) -> Self {
        Self {
            node,
            predictor: Mutex::new(None),
        }
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    model_dir: Option<PathBuf>,
    nodes: BTreeMap<ModelId, NodeEntry>,
}

impl ModelRegistry {
    /// Registry without backing files; predictors must be set explicitly.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the registry stored in `model_dir`, empty if nothing is stored yet.
    pub fn open(model_dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let model_dir = model_dir.into();
        let path = model_dir.join(REGISTRY_FILE);
        let nodes: Vec<ModelNode> = if path.exists() {
            let text = fs::read_to_string(&path).map_err(DataError::from)?;
            serde_json::from_str(&text).map_err(|e| {
                DataError::CacheError(format!("{}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            model_dir: Some(model_dir),
            nodes: nodes
                .into_iter()
                .map(|n| (n.id, NodeEntry::new(n)))
                .collect(),
        })
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }

    /// Write the node list back to `registry.json`. No-op for in-memory registries.
    pub fn save(&self) -> CoreResult<()> {
        let Some(dir) = &self.model_dir else {
            return Ok(());
        };
        let nodes: Vec<&ModelNode> = self.nodes.values().map(|e| &e.node).collect();
        let json = serde_json::to_vec_pretty(&nodes)
            .map_err(|e| DataError::CacheError(format!("registry serialization: {e}")))?;
        write_atomic(&dir.join(REGISTRY_FILE), &json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn next_id(&self) -> ModelId {
        self.nodes
            .keys()
            .next_back()
            .map_or(ModelId(1), |last| ModelId(last.0 + 1))
    }

    pub fn node(&self, id: ModelId) -> CoreResult<&ModelNode> {
        self.entry(id).map(|e| &e.node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ModelNode> {
        self.nodes.values().map(|e| &e.node)
    }

    pub fn roots(&self) -> impl Iterator<Item = &ModelNode> {
        self.nodes().filter(|n| n.is_root())
    }

    /// Look up several nodes at once, failing on the first unknown id.
    pub fn nodes_for(&self, ids: &[ModelId]) -> CoreResult<Vec<&ModelNode>> {
        ids.iter().map(|&id| self.node(id)).collect()
    }

    fn entry(&self, id: ModelId) -> CoreResult<&NodeEntry> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("model {id}")))
    }

    fn node_mut(&mut self, id: ModelId) -> CoreResult<&mut ModelNode> {
        self.nodes
            .get_mut(&id)
            .map(|e| &mut e.node)
            .ok_or_else(|| CoreError::not_found(format!("model {id}")))
    }

    /// Add a node. Its parent and every delegated model must already be registered, which
    /// keeps the delegation graph acyclic.
    pub fn register(&mut self, node: ModelNode) -> CoreResult<()> {
        if self.contains(node.id) {
            return Err(CoreError::invalid_argument(format!(
                "model {} is already registered",
                node.id
            )));
        }
        if node.horizon == 0 {
            return Err(CoreError::invalid_argument(format!(
                "model {} needs a horizon of at least one period",
                node.id
            )));
        }
        if node.resolution > Resolution::TRAINING {
            return Err(CoreError::invalid_argument(format!(
                "model {} reads {} bars, finer than the {} training slot",
                node.id,
                node.resolution,
                Resolution::TRAINING
            )));
        }
        if node.features.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "model {} has no features",
                node.id
            )));
        }
        if let Some(parent) = node.parent {
            self.node(parent)?;
        }
        for delegate in node.delegate_ids() {
            if delegate == node.id || !self.contains(delegate) {
                return Err(CoreError::invalid_argument(format!(
                    "model {} reads model {delegate}, which must be registered first",
                    node.id
                )));
            }
        }
        self.nodes.insert(node.id, NodeEntry::new(node));
        Ok(())
    }

    pub fn set_stats(&mut self, id: ModelId, stats: Option<NodeStats>) -> CoreResult<()> {
        self.node_mut(id)?.stats = stats;
        Ok(())
    }

    /// Hang `child` under `parent`'s `decision` bucket.
    pub fn attach_child(&mut self, parent: ModelId, decision: Decision, child: ModelId) -> CoreResult<()> {
        if self.node(child)?.parent != Some(parent) {
            return Err(CoreError::invalid_argument(format!(
                "model {child} was not created under model {parent}"
            )));
        }
        let slot = &mut self.node_mut(parent)?.children[decision.index()];
        if let Some(existing) = slot {
            return Err(CoreError::invalid_state(format!(
                "bucket {decision} of model {parent} already holds model {existing}"
            )));
        }
        *slot = Some(child);
        Ok(())
    }

    fn model_path(&self, id: ModelId) -> Option<PathBuf> {
        self.model_dir
            .as_ref()
            .map(|dir| dir.join(format!("model_{id}.json")))
    }

    /// Cache `predictor` for `id` and write it to the model directory.
    pub fn set_predictor(&self, id: ModelId, predictor: Predictor) -> CoreResult<()> {
        let entry = self.entry(id)?;
        if let Some(path) = self.model_path(id) {
            let json = serde_json::to_vec(&predictor)
                .map_err(|e| DataError::CacheError(format!("model {id} serialization: {e}")))?;
            write_atomic(&path, &json)?;
        }
        *entry
            .predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(predictor));
        Ok(())
    }

    /// Fitted predictor of `id`, loading it from disk on first use.
    pub fn predictor(&self, id: ModelId) -> CoreResult<Arc<Predictor>> {
        let entry = self.entry(id)?;
        let mut slot = entry
            .predictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = slot.as_ref() {
            return Ok(Arc::clone(p));
        }
        let path = self
            .model_path(id)
            .filter(|p| p.exists())
            .ok_or_else(|| CoreError::invalid_state(format!("model {id} has no fitted predictor")))?;
        let text = fs::read_to_string(&path).map_err(DataError::from)?;
        let predictor: Predictor = serde_json::from_str(&text)
            .map_err(|e| DataError::CacheError(format!("{}: {e}", path.display())))?;
        let predictor = Arc::new(predictor);
        *slot = Some(Arc::clone(&predictor));
        Ok(predictor)
    }

    pub fn is_loaded(&self, id: ModelId) -> bool {
        self.entry(id).is_ok_and(|e| {
            e.predictor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Drop the cached predictor; the next prediction reloads it.
    pub fn unload(&self, id: ModelId) {
        if let Ok(entry) = self.entry(id) {
            *entry
                .predictor
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    /// Drill-down DFP of `id` for the state at `cursor`, `None` while history is too short.
    pub fn predict_dfp(
        &self,
        id: ModelId,
        store: &MultiResolutionStore,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>> {
        let node = self.node(id)?;
        let engine = FeatureEngine::new(store, self);
        match engine.evaluate(&node.features, node.resolution, price, cursor)? {
            Some(row) => self.dfp_from_row(id, &row).map(Some),
            None => Ok(None),
        }
    }

    /// DFP of `id` for an already computed feature row.
    ///
    /// A bucket model hands the row to the child of the predicted bucket when that child
    /// is precise enough; children share their parent's features, so the row carries over.
    pub fn dfp_from_row(&self, id: ModelId, row: &[f64]) -> CoreResult<f64> {
        let node = self.node(id)?;
        match &*self.predictor(id)? {
            Predictor::Linear(model) => model.predict(row),
            Predictor::DecisionBucket(classifier) => {
                let decision = classifier.classify(row)?;
                if let Some(child) = node.child(decision) {
                    let precise = self
                        .node(child)?
                        .stats
                        .as_ref()
                        .is_some_and(|s| s.precision > DRILL_DOWN_PRECISION);
                    if precise {
                        return self.dfp_from_row(child, row);
                    }
                }
                node.decision_profit(decision)
            }
        }
    }

    /// Remove `id` and its whole subtree, detaching it from its parent's bucket.
    ///
    /// Fails while any other model still delegates to a node of the subtree.
    pub fn remove(&mut self, id: ModelId) -> CoreResult<Vec<ModelId>> {
        let parent = self.node(id)?.parent;
        let removed = self.remove_subtrees(&[id])?;
        if let Some(parent) = parent {
            if let Ok(node) = self.node_mut(parent) {
                for slot in node.children.iter_mut() {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
            }
        }
        self.save()?;
        Ok(removed)
    }

    /// Forget training: children are removed, statistics and the fitted predictor dropped.
    pub fn rebuild(&mut self, id: ModelId) -> CoreResult<Vec<ModelId>> {
        let children: Vec<ModelId> = self.node(id)?.child_ids().collect();
        let removed = self.remove_subtrees(&children)?;
        let node = self.node_mut(id)?;
        node.children = [None; Decision::COUNT];
        node.stats = None;
        self.unload(id);
        self.delete_model_file(id)?;
        self.save()?;
        Ok(removed)
    }

    fn remove_subtrees(&mut self, roots: &[ModelId]) -> CoreResult<Vec<ModelId>> {
        let mut doomed = BTreeSet::new();
        let mut stack = roots.to_vec();
        while let Some(next) = stack.pop() {
            if doomed.insert(next) {
                stack.extend(self.node(next)?.child_ids());
            }
        }
        for node in self.nodes().filter(|n| !doomed.contains(&n.id)) {
            if let Some(d) = node.delegate_ids().find(|d| doomed.contains(d)) {
                return Err(CoreError::invalid_state(format!(
                    "model {} still reads model {d}",
                    node.id
                )));
            }
        }
        for &id in &doomed {
            self.nodes.remove(&id);
            self.delete_model_file(id)?;
        }
        Ok(doomed.into_iter().collect())
    }

    fn delete_model_file(&self, id: ModelId) -> CoreResult<()> {
        if let Some(path) = self.model_path(id).filter(|p| p.exists()) {
            fs::remove_file(path).map_err(DataError::from)?;
        }
        Ok(())
    }
}

impl Delegate for ModelRegistry {
    fn predict_dfp(
        &self,
        id: ModelId,
        store: &MultiResolutionStore,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>> {
        ModelRegistry::predict_dfp(self, id, store, price, cursor)
    }

    fn horizon(&self, id: ModelId) -> CoreResult<usize> {
        Ok(self.node(id)?.horizon)
    }
}
