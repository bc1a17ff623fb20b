//! RobustPrune diversity selection.
//!
//! DiskANN's edge rule in the higher-is-better score convention: walking
//! candidates best first, a candidate `c` is accepted only if no already
//! accepted neighbor `a` dominates it, i.e. `score(a, c) <= alpha *
//! score(p, c)` must hold for every accepted `a`. Alpha above 1.0 relaxes
//! the rule and yields better-connected graphs during construction.

use crate::error::Result;
use crate::node_array::NodeArray;
use crate::score::{BuildScoreProvider, ScoreFn};
use crate::NodeId;

/// One pruning configuration: provider, relaxation, degree bound.
pub(crate) struct Pruner<'a> {
    pub provider: &'a dyn BuildScoreProvider,
    pub alpha: f32,
    pub max_degree: usize,
}

impl Pruner<'_> {
    /// Selects up to `max_degree` diverse neighbors for `base` from
    /// `candidates` (sorted best first, scores relative to `base`).
    ///
    /// Accepted nodes keep their exact scorers alive for the duration of
    /// the call, so each pairwise check re-reads no vectors.
    ///
    /// # Errors
    ///
    /// Propagates scorer construction and scoring failures.
    pub(crate) fn prune(&self, base: NodeId, candidates: &NodeArray) -> Result<NodeArray> {
        let mut selected = NodeArray::with_capacity(self.max_degree);
        // Scratch cache: one scorer per accepted node, reused pairwise
        let mut scorers: Vec<Box<dyn ScoreFn>> = Vec::with_capacity(self.max_degree);

        for (candidate, score_to_base) in candidates.iter() {
            if selected.len() >= self.max_degree {
                break;
            }
            if candidate == base {
                continue;
            }
            let mut diverse = true;
            for accepted_scorer in &scorers {
                if accepted_scorer.similarity_to(candidate)? > self.alpha * score_to_base {
                    diverse = false;
                    break;
                }
            }
            if diverse {
                selected.add_in_order(candidate, score_to_base);
                scorers.push(self.provider.diversity_scorer(candidate)?);
            }
        }

        // Under quota: pad with the best remaining candidates so sparse
        // regions still reach full degree
        if selected.len() < self.max_degree {
            for (candidate, score_to_base) in candidates.iter() {
                if selected.len() >= self.max_degree {
                    break;
                }
                if candidate == base || selected.contains(candidate) {
                    continue;
                }
                selected.insert_sorted(candidate, score_to_base);
            }
        }

        Ok(selected)
    }
}
