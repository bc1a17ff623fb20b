//! Best-first beam search over a graph view.
//!
//! The traversal keeps two heaps keyed by score: a max-first candidate
//! frontier and a min-first bounded result heap. Popping a candidate that
//! cannot beat the worst retained result terminates the loop. With an
//! approximate scorer, the retained overquery set is reranked exactly
//! before the top K is returned.
//!
//! Search state survives between calls so [`GraphSearcher::resume`] can
//! continue where a search left off and produce further results.

use serde::{Deserialize, Serialize};

use super::{AcceptBits, GraphView};
use crate::bitset::GrowableBitSet;
use crate::error::Result;
use crate::node_array::NodeArray;
use crate::node_queue::{NodeQueue, QueueOrder};
use crate::score::ScoreFn;
use crate::NodeId;

/// Search tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearcherParams {
    /// Threshold mode: frontier pops below the threshold tolerated before
    /// the search gives up.
    pub patience: usize,
}

impl Default for SearcherParams {
    fn default() -> Self {
        Self { patience: 16 }
    }
}

/// Result of one search or resume call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// `(ordinal, score)` pairs sorted by score descending, ties by
    /// ascending ordinal. Scores are reranked when a reranker ran.
    pub nodes: Vec<(NodeId, f32)>,
    /// Distinct ordinals whose neighbor list was opened.
    pub visited_count: usize,
    /// Score of the last returned node, `NEG_INFINITY` when empty.
    pub worst_in_topk: f32,
}

impl SearchResult {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            visited_count: 0,
            worst_in_topk: f32::NEG_INFINITY,
        }
    }

    fn from_nodes(nodes: Vec<(NodeId, f32)>, visited_count: usize) -> Self {
        let worst_in_topk = nodes.last().map_or(f32::NEG_INFINITY, |&(_, s)| s);
        Self {
            nodes,
            visited_count,
            worst_in_topk,
        }
    }
}

/// Resumable beam searcher over one graph view.
///
/// One searcher serves one query at a time; [`GraphSearcher::search`]
/// resets all state, [`GraphSearcher::resume`] continues it. The borrowed
/// scorer, reranker and accept mask live for the searcher's lifetime
/// parameter, which lets disk-backed scorers borrow from their view.
pub struct GraphSearcher<'a> {
    graph: &'a dyn GraphView,
    params: SearcherParams,
    visited: GrowableBitSet,
    /// Ordinals whose neighbor list was actually opened; drives
    /// `visited_count` and keeps re-queued nodes from re-expanding.
    expanded: GrowableBitSet,
    /// Ordinals already returned by earlier calls of this search session.
    emitted: GrowableBitSet,
    candidates: NodeQueue,
    scratch: Vec<NodeId>,
    scores: Vec<f32>,
    visited_count: usize,
    scorer: Option<Box<dyn ScoreFn + 'a>>,
    reranker: Option<Box<dyn ScoreFn + 'a>>,
    accept: Option<&'a dyn AcceptBits>,
}

impl<'a> GraphSearcher<'a> {
    /// Creates a searcher over `graph` with default parameters.
    #[must_use]
    pub fn new(graph: &'a dyn GraphView) -> Self {
        Self::with_params(graph, SearcherParams::default())
    }

    /// Creates a searcher with explicit parameters.
    #[must_use]
    pub fn with_params(graph: &'a dyn GraphView, params: SearcherParams) -> Self {
        Self {
            graph,
            params,
            visited: GrowableBitSet::new(),
            expanded: GrowableBitSet::new(),
            emitted: GrowableBitSet::new(),
            candidates: NodeQueue::new(QueueOrder::MaxFirst),
            scratch: Vec::new(),
            scores: Vec::new(),
            visited_count: 0,
            scorer: None,
            reranker: None,
            accept: None,
        }
    }

    /// Searches for the best `topk` accepted nodes.
    ///
    /// `overquery` widens the retained set before reranking and is raised
    /// to at least `topk`; with an exact scorer it has no effect beyond
    /// retention. An empty graph yields an empty result.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for invalid ordinals reached through corrupted state,
    /// `Io` from scorer storage; no partial results are returned.
    pub fn search(
        &mut self,
        scorer: Box<dyn ScoreFn + 'a>,
        reranker: Option<Box<dyn ScoreFn + 'a>>,
        topk: usize,
        overquery: usize,
        accept: &'a dyn AcceptBits,
    ) -> Result<SearchResult> {
        self.reset();
        self.scorer = Some(scorer);
        self.reranker = reranker;
        self.accept = Some(accept);

        let Some((entry, entry_level)) = self.graph.entry() else {
            return Ok(SearchResult::empty());
        };

        // Hierarchy: greedy single-best descent to layer 0
        let scorer = self.scorer.as_deref().expect("scorer installed above");
        let mut seed = entry;
        for level in (1..=entry_level).rev() {
            seed = greedy_step_down(self.graph, scorer, level, seed)?;
        }

        let seed_score = scorer.similarity_to(seed)?;
        self.visited.set(seed);
        self.candidates.push(seed, seed_score);

        self.run_bounded(topk, overquery.max(topk))
    }

    /// Continues the previous search to produce up to `more_k` further
    /// nodes beyond everything already returned.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`GraphSearcher::search`].
    pub fn resume(&mut self, more_k: usize) -> Result<SearchResult> {
        if self.scorer.is_none() {
            return Ok(SearchResult::empty());
        }
        self.run_bounded(more_k, more_k)
    }

    /// Returns every accepted node whose final score reaches `threshold`.
    ///
    /// Termination is governed by patience: after
    /// [`SearcherParams::patience`] consecutive frontier pops below the
    /// threshold the frontier is considered dry.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`GraphSearcher::search`].
    pub fn search_threshold(
        &mut self,
        scorer: Box<dyn ScoreFn + 'a>,
        threshold: f32,
        reranker: Option<Box<dyn ScoreFn + 'a>>,
        accept: &'a dyn AcceptBits,
    ) -> Result<SearchResult> {
        self.reset();
        self.scorer = Some(scorer);
        self.reranker = reranker;
        self.accept = Some(accept);

        let Some((entry, entry_level)) = self.graph.entry() else {
            return Ok(SearchResult::empty());
        };

        let scorer = self.scorer.as_deref().expect("scorer installed above");
        let mut seed = entry;
        for level in (1..=entry_level).rev() {
            seed = greedy_step_down(self.graph, scorer, level, seed)?;
        }
        let seed_score = scorer.similarity_to(seed)?;
        self.visited.set(seed);
        self.candidates.push(seed, seed_score);

        let mut kept: Vec<(NodeId, f32)> = Vec::new();
        let mut dry_pops = 0usize;

        while let Some((node, score)) = self.candidates.pop() {
            if score < threshold {
                dry_pops += 1;
                if dry_pops > self.params.patience {
                    break;
                }
            } else {
                dry_pops = 0;
            }

            let accept = self.accept.expect("accept installed above");
            if score >= threshold && accept.accepts(node) {
                kept.push((node, score));
            }
            self.expand(node)?;
            for i in 0..self.scratch.len() {
                self.candidates.push(self.scratch[i], self.scores[i]);
            }
        }

        // Rerank survivors exactly, re-apply the threshold on final scores
        let is_exact = self.scorer.as_deref().is_some_and(|s| s.is_exact());
        if let (Some(reranker), false) = (self.reranker.as_deref(), is_exact) {
            let mut reranked = Vec::with_capacity(kept.len());
            for (node, _) in kept {
                let exact = reranker.similarity_to(node)?;
                if exact >= threshold {
                    reranked.push((node, exact));
                }
            }
            kept = reranked;
        }
        kept.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        for &(node, _) in &kept {
            self.emitted.set(node);
        }
        Ok(SearchResult::from_nodes(kept, self.visited_count))
    }

    fn reset(&mut self) {
        self.visited.clear_all();
        self.expanded.clear_all();
        self.emitted.clear_all();
        self.candidates.clear();
        self.visited_count = 0;
        self.scorer = None;
        self.reranker = None;
        self.accept = None;
    }

    /// Core bounded loop shared by `search` and `resume`.
    fn run_bounded(&mut self, topk: usize, retain: usize) -> Result<SearchResult> {
        if retain == 0 {
            return Ok(SearchResult::from_nodes(Vec::new(), self.visited_count));
        }
        let mut results = NodeQueue::new(QueueOrder::MinFirst);

        while let Some((node, score)) = self.candidates.pop() {
            if results.len() >= retain {
                let (_, worst) = results.peek().expect("results non-empty");
                if score < worst {
                    // Nothing left on the frontier can improve the retained set;
                    // push back so a later resume call reconsiders it
                    self.candidates.push(node, score);
                    break;
                }
            }

            let accept = self.accept.expect("accept installed");
            if accept.accepts(node) && !self.emitted.get(node) {
                results.push_bounded(node, score, retain);
            }

            self.expand(node)?;
            for i in 0..self.scratch.len() {
                self.candidates.push(self.scratch[i], self.scores[i]);
            }
        }

        let retained_approx = results.drain_sorted_desc();
        let mut retained = retained_approx.clone();

        // Rerank with exact scores when the search scorer was approximate
        let is_exact = self.scorer.as_deref().is_some_and(|s| s.is_exact());
        if let (Some(reranker), false) = (self.reranker.as_deref(), is_exact) {
            for entry in &mut retained {
                entry.1 = reranker.similarity_to(entry.0)?;
            }
            retained.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        }
        retained.truncate(topk);
        for &(node, _) in &retained {
            self.emitted.set(node);
        }
        // Retained-but-unreturned extras go back on the frontier (at their
        // traversal scores) so a later resume can hand them out
        for &(node, score) in &retained_approx {
            if !self.emitted.get(node) {
                self.candidates.push(node, score);
            }
        }
        Ok(SearchResult::from_nodes(retained, self.visited_count))
    }

    /// Opens `node`'s layer-0 neighbor list; fresh neighbors and their
    /// scores land in `self.scratch` / `self.scores`.
    ///
    /// A node re-queued by resume is only ever opened once.
    fn expand(&mut self, node: NodeId) -> Result<()> {
        if !self.expanded.set(node) {
            self.scratch.clear();
            self.scores.clear();
            return Ok(());
        }
        let scorer = self.scorer.as_deref().expect("expand without scorer");
        scorer.begin_expansion(node)?;
        self.graph.neighbors_into(0, node, &mut self.scratch)?;
        self.visited_count += 1;

        self.scratch.retain(|&n| self.visited.set(n));
        self.scores.resize(self.scratch.len(), 0.0);
        scorer.bulk_similarity_to(&self.scratch, &mut self.scores)?;
        Ok(())
    }
}

/// One greedy descent step: walks `level` from `start` to the local best.
pub(crate) fn greedy_step_down(
    graph: &dyn GraphView,
    scorer: &dyn ScoreFn,
    level: usize,
    start: NodeId,
) -> Result<NodeId> {
    let mut best = start;
    let mut best_score = scorer.similarity_to(start)?;
    let mut neighbors = Vec::new();

    loop {
        scorer.begin_expansion(best)?;
        graph.neighbors_into(level, best, &mut neighbors)?;
        let mut improved = false;
        for &n in &neighbors {
            let s = scorer.similarity_to(n)?;
            if s > best_score {
                best = n;
                best_score = s;
                improved = true;
            }
        }
        if !improved {
            return Ok(best);
        }
    }
}

/// Full-width beam at one level, used by the builder to collect insertion
/// candidates. Returns up to `width` nodes sorted best first.
pub(crate) fn search_level(
    graph: &dyn GraphView,
    scorer: &dyn ScoreFn,
    level: usize,
    seed: NodeId,
    width: usize,
) -> Result<NodeArray> {
    let mut visited = GrowableBitSet::new();
    let mut candidates = NodeQueue::new(QueueOrder::MaxFirst);
    let mut results = NodeQueue::new(QueueOrder::MinFirst);
    let mut neighbors = Vec::new();
    let mut scores = Vec::new();

    let seed_score = scorer.similarity_to(seed)?;
    visited.set(seed);
    candidates.push(seed, seed_score);
    results.push_bounded(seed, seed_score, width);

    while let Some((node, score)) = candidates.pop() {
        if results.len() >= width {
            let (_, worst) = results.peek().expect("results non-empty");
            if score < worst {
                break;
            }
        }
        scorer.begin_expansion(node)?;
        graph.neighbors_into(level, node, &mut neighbors)?;
        neighbors.retain(|&n| visited.set(n));
        scores.resize(neighbors.len(), 0.0);
        scorer.bulk_similarity_to(&neighbors, &mut scores)?;
        for (i, &n) in neighbors.iter().enumerate() {
            candidates.push(n, scores[i]);
            results.push_bounded(n, scores[i], width);
        }
    }

    let mut out = NodeArray::with_capacity(width);
    for (node, score) in results.drain_sorted_desc() {
        out.add_in_order(node, score);
    }
    Ok(out)
}
