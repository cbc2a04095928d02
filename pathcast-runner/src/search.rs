//! Greedy search for the best enabled model set.
//!
//! Each round scores the enabled set, then tries in turn: dropping one model, swapping one for
//! a more precise model of the same horizon, and adding one model. The first move that beats
//! the incumbent is persisted and the round restarts; a round with no such move ends the
//! search.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{bail, Context, Result};
use pathcast_core::data::Persistence;
use pathcast_core::domain::ModelId;
use pathcast_core::model::{ModelNode, ModelRegistry};

use crate::metrics::Score;

/// Upgrade candidates rejected for low precision are reported for the first few enabled
/// models only.
const LOW_PRECISION_REPORTS: usize = 3;

/// Scores one model set. Results may be cached under `name`.
pub trait CombinationEvaluator {
    fn evaluate(&mut self, ids: &[ModelId], name: &str) -> Result<Score>;

    /// Forget cached scores; called whenever the enabled set changes.
    fn clear_cache(&mut self) -> Result<()>;
}

/// Receives search events.
pub trait SearchProgress {
    fn best(&mut self, score: &Score);
    fn accepted(&mut self, change: &SearchMove);
    fn low_precision(&mut self, candidate: ModelId);
    fn failed(&mut self, change: &SearchMove, error: &anyhow::Error);
}

/// Prints search events to the terminal.
pub struct StdoutProgress;

impl SearchProgress for StdoutProgress {
    fn best(&mut self, score: &Score) {
        println!("{score}");
    }

    fn accepted(&mut self, change: &SearchMove) {
        match change {
            SearchMove::Remove(id) => println!("Weak model has been found. Model ID: {id}"),
            SearchMove::Upgrade { from, to } => println!(
                "Model upgrade has been found. Old model ID: {from}. New model ID: {to}"
            ),
            SearchMove::Add(id) => println!("Strong model has been found. Model ID: {id}"),
        }
    }

    fn low_precision(&mut self, candidate: ModelId) {
        eprintln!("WARNING: low precision model detected. Model ID: {candidate}");
    }

    fn failed(&mut self, change: &SearchMove, error: &anyhow::Error) {
        eprintln!("WARNING: {} could not be scored: {error:#}", change.name());
    }
}

/// Discards search events.
pub struct SilentProgress;

impl SearchProgress for SilentProgress {
    fn best(&mut self, _: &Score) {}
    fn accepted(&mut self, _: &SearchMove) {}
    fn low_precision(&mut self, _: ModelId) {}
    fn failed(&mut self, _: &SearchMove, _: &anyhow::Error) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMove {
    Remove(ModelId),
    Upgrade { from: ModelId, to: ModelId },
    Add(ModelId),
}

impl SearchMove {
    /// Cache name of the model set this move produces.
    pub fn name(&self) -> String {
        match self {
            SearchMove::Remove(id) => format!("WithoutModel{id}"),
            SearchMove::Upgrade { from, to } => format!("ModelUpgrade_{from}_To_{to}"),
            SearchMove::Add(id) => format!("WithModel{id}"),
        }
    }

    pub fn apply(&self, enabled: &[ModelId]) -> Vec<ModelId> {
        match *self {
            SearchMove::Remove(id) => enabled.iter().copied().filter(|&e| e != id).collect(),
            SearchMove::Upgrade { from, to } => enabled
                .iter()
                .copied()
                .filter(|&e| e != from)
                .chain(std::iter::once(to))
                .collect(),
            SearchMove::Add(id) => enabled.iter().copied().chain(std::iter::once(id)).collect(),
        }
    }

    /// The model this move brings in, if any.
    fn incoming(&self) -> Option<ModelId> {
        match *self {
            SearchMove::Remove(_) => None,
            SearchMove::Upgrade { to, .. } => Some(to),
            SearchMove::Add(id) => Some(id),
        }
    }

    fn persist(&self, persistence: &dyn Persistence) -> Result<()> {
        match *self {
            SearchMove::Remove(id) => persistence.disable_model(id)?,
            SearchMove::Upgrade { from, to } => {
                persistence.disable_model(from)?;
                persistence.enable_model(to)?;
            }
            SearchMove::Add(id) => persistence.enable_model(id)?,
        }
        Ok(())
    }
}

impl fmt::Display for SearchMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub enabled: Vec<ModelId>,
    pub score: Score,
    pub accepted: Vec<SearchMove>,
}

pub struct CombinationSearch<'a> {
    registry: &'a ModelRegistry,
    persistence: &'a dyn Persistence,
}

impl<'a> CombinationSearch<'a> {
    pub fn new(registry: &'a ModelRegistry, persistence: &'a dyn Persistence) -> Self {
        Self {
            registry,
            persistence,
        }
    }

    /// Enabled models, ascending by precision.
    fn enabled(&self) -> Result<Vec<&'a ModelNode>> {
        let ids: Vec<ModelId> = self
            .persistence
            .enabled_models()
            .context("Failed to read the enabled model set")?
            .into_iter()
            .collect();
        if ids.is_empty() {
            bail!("no model is enabled");
        }
        let mut nodes = self.registry.nodes_for(&ids)?;
        sort_by_precision(&mut nodes)?;
        Ok(nodes)
    }

    /// Trained roots outside the enabled set, descending by precision.
    fn optional(&self, enabled: &[&ModelNode]) -> Result<Vec<&'a ModelNode>> {
        let taken: BTreeSet<ModelId> = enabled.iter().map(|n| n.id).collect();
        let mut nodes: Vec<&ModelNode> = self
            .registry
            .roots()
            .filter(|n| n.is_trained() && !taken.contains(&n.id))
            .collect();
        sort_by_precision(&mut nodes)?;
        nodes.reverse();
        Ok(nodes)
    }

    /// Candidate moves of one round, in the order they are tried.
    fn moves(
        &self,
        enabled: &[&ModelNode],
        optional: &[&ModelNode],
        progress: &mut dyn SearchProgress,
    ) -> Result<Vec<SearchMove>> {
        let mut moves = Vec::new();
        if enabled.len() > 1 {
            moves.extend(enabled.iter().map(|n| SearchMove::Remove(n.id)));
        }
        for (i, current) in enabled.iter().enumerate() {
            for candidate in optional.iter().filter(|c| c.horizon == current.horizon) {
                if candidate.precision()? <= current.precision()? {
                    if i < LOW_PRECISION_REPORTS {
                        progress.low_precision(candidate.id);
                    }
                    continue;
                }
                moves.push(SearchMove::Upgrade {
                    from: current.id,
                    to: candidate.id,
                });
            }
        }
        moves.extend(optional.iter().map(|n| SearchMove::Add(n.id)));
        Ok(moves)
    }

    /// Search until no move improves the enabled set. Every accepted move is persisted
    /// before the next round starts.
    pub fn run(
        &self,
        evaluator: &mut dyn CombinationEvaluator,
        progress: &mut dyn SearchProgress,
    ) -> Result<SearchOutcome> {
        let mut accepted = Vec::new();
        loop {
            let enabled = self.enabled()?;
            let ids: Vec<ModelId> = enabled.iter().map(|n| n.id).collect();
            let best = evaluator
                .evaluate(&ids, "")
                .context("Failed to score the enabled model set")?;
            progress.best(&best);

            let optional = self.optional(&enabled)?;
            let mut improved = None;
            for change in self.moves(&enabled, &optional, progress)? {
                match evaluator.evaluate(&change.apply(&ids), &change.name()) {
                    Ok(score) if score.is_better_than(&best) => {
                        improved = Some((change, score));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => progress.failed(&change, &e),
                }
                if let Some(id) = change.incoming() {
                    self.registry.unload(id);
                }
            }

            let Some((change, score)) = improved else {
                return Ok(SearchOutcome {
                    enabled: ids,
                    score: best,
                    accepted,
                });
            };
            progress.accepted(&change);
            progress.best(&score);
            change
                .persist(self.persistence)
                .with_context(|| format!("Failed to persist {change}"))?;
            evaluator.clear_cache()?;
            accepted.push(change);
        }
    }
}

fn sort_by_precision(nodes: &mut Vec<&ModelNode>) -> Result<()> {
    let mut keyed = nodes
        .iter()
        .map(|n| Ok((n.precision()?, *n)))
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
    *nodes = keyed.into_iter().map(|(_, n)| n).collect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathcast_core::data::MemoryPersistence;
    use pathcast_core::domain::Resolution;
    use pathcast_core::model::{Decision, ModelKind, NodeStats};
    use std::collections::BTreeMap;

    fn node(id: u32, horizon: usize, precision: f64) -> ModelNode {
        let mut node = ModelNode::root(
            ModelId(id),
            ModelKind::Linear,
            Resolution::H1,
            horizon,
            vec!["Rsi;14".parse().unwrap()],
        );
        node.stats = Some(NodeStats {
            precision,
            profit_stddev: 0.01,
            profit_average: 0.0,
            is_singular: false,
            prediction_profits: [0.0; Decision::COUNT],
            reproduction_complete: true,
        });
        node
    }

    fn registry(nodes: &[(u32, usize, f64)]) -> ModelRegistry {
        let mut registry = ModelRegistry::in_memory();
        for &(id, horizon, precision) in nodes {
            registry.register(node(id, horizon, precision)).unwrap();
        }
        registry
    }

    fn enabled(ids: &[u32]) -> MemoryPersistence {
        let persistence = MemoryPersistence::new();
        for &id in ids {
            persistence.enable_model(ModelId(id)).unwrap();
        }
        persistence
    }

    /// Scores sets from a table keyed by their sorted ids; unknown sets score as the baseline.
    struct TableEvaluator {
        scores: BTreeMap<Vec<u32>, Score>,
        baseline: Score,
        evaluated: Vec<String>,
        clears: usize,
    }

    impl TableEvaluator {
        fn new(baseline: Score) -> Self {
            Self {
                scores: BTreeMap::new(),
                baseline,
                evaluated: Vec::new(),
                clears: 0,
            }
        }

        fn with(mut self, ids: &[u32], score: Score) -> Self {
            let mut key = ids.to_vec();
            key.sort_unstable();
            self.scores.insert(key, score);
            self
        }
    }

    impl CombinationEvaluator for TableEvaluator {
        fn evaluate(&mut self, ids: &[ModelId], name: &str) -> Result<Score> {
            self.evaluated.push(name.to_string());
            let mut key: Vec<u32> = ids.iter().map(|id| id.0).collect();
            key.sort_unstable();
            if key == [99] {
                bail!("simulation exploded");
            }
            Ok(self.scores.get(&key).copied().unwrap_or(self.baseline))
        }

        fn clear_cache(&mut self) -> Result<()> {
            self.clears += 1;
            Ok(())
        }
    }

    fn baseline() -> Score {
        Score::new(0.50, 0.02, 0.60)
    }

    #[test]
    fn move_names_follow_the_cache_convention() {
        assert_eq!(SearchMove::Remove(ModelId(3)).name(), "WithoutModel3");
        assert_eq!(
            SearchMove::Upgrade { from: ModelId(3), to: ModelId(8) }.name(),
            "ModelUpgrade_3_To_8"
        );
        assert_eq!(SearchMove::Add(ModelId(8)).name(), "WithModel8");
    }

    #[test]
    fn no_improvement_ends_after_one_round() {
        let registry = registry(&[(1, 24, 0.6), (2, 24, 0.7), (3, 48, 0.55)]);
        let persistence = enabled(&[1, 2]);
        let mut evaluator = TableEvaluator::new(baseline());

        let outcome = CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.enabled, vec![ModelId(1), ModelId(2)]);
        assert_eq!(
            evaluator.evaluated,
            vec!["", "WithoutModel1", "WithoutModel2", "WithModel3"]
        );
        assert_eq!(evaluator.clears, 0);
    }

    #[test]
    fn removal_is_accepted_and_persisted() {
        let registry = registry(&[(1, 24, 0.6), (2, 24, 0.7)]);
        let persistence = enabled(&[1, 2]);
        let mut evaluator =
            TableEvaluator::new(baseline()).with(&[2], Score::new(0.55, 0.018, 0.62));

        let outcome = CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();

        assert_eq!(outcome.accepted, vec![SearchMove::Remove(ModelId(1))]);
        assert_eq!(outcome.enabled, vec![ModelId(2)]);
        assert_eq!(outcome.score, Score::new(0.55, 0.018, 0.62));
        assert_eq!(
            persistence.enabled_models().unwrap().into_iter().collect::<Vec<_>>(),
            vec![ModelId(2)]
        );
        assert_eq!(evaluator.clears, 1);
    }

    #[test]
    fn noisier_candidate_is_rejected() {
        let registry = registry(&[(1, 24, 0.6), (2, 24, 0.7)]);
        let persistence = enabled(&[1, 2]);
        let mut evaluator =
            TableEvaluator::new(baseline()).with(&[2], Score::new(0.60, 0.025, 0.58));

        let outcome = CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn upgrade_needs_same_horizon_and_higher_precision() {
        // 3 shares model 1's horizon and beats it; 4 shares it but is weaker; 5 is elsewhere.
        let registry = registry(&[(1, 24, 0.6), (2, 48, 0.7), (3, 24, 0.65), (4, 24, 0.55), (5, 12, 0.9)]);
        let persistence = enabled(&[1, 2]);
        let improved = Score::new(0.55, 0.018, 0.62);
        let mut evaluator = TableEvaluator::new(baseline())
            .with(&[2, 3], improved)
            .with(&[2, 3, 5], Score::new(0.5, 0.03, 0.6));

        let outcome = CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();

        assert_eq!(
            outcome.accepted,
            vec![SearchMove::Upgrade { from: ModelId(1), to: ModelId(3) }]
        );
        assert_eq!(evaluator.evaluated[..4], ["", "WithoutModel1", "WithoutModel2", "ModelUpgrade_1_To_3"]);
        assert!(!evaluator.evaluated.iter().any(|n| n == "ModelUpgrade_1_To_4"));
        assert!(!evaluator.evaluated.iter().any(|n| n.starts_with("ModelUpgrade_1_To_5")));
        let now: Vec<ModelId> = persistence.enabled_models().unwrap().into_iter().collect();
        assert_eq!(now, vec![ModelId(2), ModelId(3)]);
    }

    #[test]
    fn additions_are_tried_in_descending_precision() {
        let registry = registry(&[(1, 24, 0.6), (2, 12, 0.55), (3, 48, 0.8)]);
        let persistence = enabled(&[1]);
        let mut evaluator = TableEvaluator::new(baseline());

        CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();
        assert_eq!(evaluator.evaluated, vec!["", "WithModel3", "WithModel2"]);
    }

    #[test]
    fn failing_candidates_do_not_abort_the_search() {
        let registry = registry(&[(1, 24, 0.6), (99, 24, 0.5)]);
        let persistence = enabled(&[1, 99]);
        let mut evaluator = TableEvaluator::new(baseline());

        let outcome = CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .unwrap();
        assert!(outcome.accepted.is_empty());
        assert_eq!(evaluator.evaluated, vec!["", "WithoutModel99", "WithoutModel1"]);
    }

    #[test]
    fn nothing_enabled_is_an_error() {
        let registry = registry(&[(1, 24, 0.6)]);
        let persistence = MemoryPersistence::new();
        let mut evaluator = TableEvaluator::new(baseline());
        assert!(CombinationSearch::new(&registry, &persistence)
            .run(&mut evaluator, &mut SilentProgress)
            .is_err());
    }
}
