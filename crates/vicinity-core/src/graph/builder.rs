//! Concurrent incremental graph construction.
//!
//! `add_graph_node` calls may run in parallel: candidate collection reads
//! published neighbor snapshots, and every list update goes through the
//! optimistic publish loop in [`super::neighbors`]. Deletion is a tombstone
//! until [`GraphBuilder::cleanup`] repairs edges, drops the nodes and
//! re-elects the entry point if needed.

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::diversity::Pruner;
use super::on_heap::OnHeapGraph;
use super::search::{greedy_step_down, search_level};
use super::GraphView;
use crate::error::{Error, Result};
use crate::node_array::NodeArray;
use crate::score::BuildScoreProvider;
use crate::vectors::VectorSource;
use crate::NodeId;

/// Graph construction parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BuilderParams {
    /// Maximum neighbors per node at layer 0 (`M`); halves per level above.
    pub max_degree: usize,
    /// Insertion beam width (`W`).
    pub beam_width: usize,
    /// Transient neighbor-list overflow factor before a forced prune.
    pub alpha_overflow: f32,
    /// Diversity relaxation for RobustPrune; 1.2 to 1.4 yields
    /// better-connected graphs during construction.
    pub alpha_diversity: f32,
    /// Maintain geometric upper layers for beam seeding.
    pub hierarchy: bool,
}

impl Default for BuilderParams {
    fn default() -> Self {
        Self {
            max_degree: 32,
            beam_width: 100,
            alpha_overflow: 1.2,
            alpha_diversity: 1.2,
            hierarchy: false,
        }
    }
}

impl BuilderParams {
    fn validate(&self) -> Result<()> {
        if self.max_degree == 0 {
            return Err(Error::InvalidArgument("max_degree must be positive".into()));
        }
        if self.beam_width == 0 {
            return Err(Error::InvalidArgument("beam_width must be positive".into()));
        }
        if self.alpha_overflow < 1.0 || !self.alpha_overflow.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "alpha_overflow {} must be at least 1.0",
                self.alpha_overflow
            )));
        }
        if self.alpha_diversity < 1.0 || !self.alpha_diversity.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "alpha_diversity {} must be at least 1.0",
                self.alpha_diversity
            )));
        }
        Ok(())
    }
}

/// Incremental graph builder.
pub struct GraphBuilder {
    params: BuilderParams,
    provider: Arc<dyn BuildScoreProvider>,
    graph: Arc<OnHeapGraph>,
    /// Layer selection PRNG, shared and lock-free.
    rng_state: AtomicU64,
    /// `1 / ln(max_degree)`: level sampling multiplier.
    level_mult: f64,
    /// Cleanup serializes against itself only.
    cleanup_lock: Mutex<()>,
}

impl GraphBuilder {
    /// Creates a builder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for out-of-range parameters.
    pub fn new(provider: Arc<dyn BuildScoreProvider>, params: BuilderParams) -> Result<Self> {
        params.validate()?;
        #[allow(clippy::cast_precision_loss)]
        let level_mult = 1.0 / (params.max_degree.max(2) as f64).ln();
        Ok(Self {
            graph: Arc::new(OnHeapGraph::new(params.max_degree, params.alpha_overflow)),
            provider,
            params,
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            level_mult,
            cleanup_lock: Mutex::new(()),
        })
    }

    /// The graph under construction.
    #[must_use]
    pub fn graph(&self) -> &Arc<OnHeapGraph> {
        &self.graph
    }

    /// Inserts `ord` with `vector` as its coordinates.
    ///
    /// Safe to call from multiple threads with distinct ordinals. Vectors
    /// are owned by the caller's source; the builder only stores ordinals.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on dimension mismatch, scorer errors otherwise.
    pub fn add_graph_node(&self, ord: NodeId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.provider.dimension() {
            return Err(Error::InvalidArgument(format!(
                "vector dimension {} does not match provider dimension {}",
                vector.len(),
                self.provider.dimension()
            )));
        }

        // Claim the ordinal before anything can observe it
        self.graph.note_id(ord);

        let node_level = if self.params.hierarchy {
            self.sample_level()
        } else {
            0
        };

        // First node: install as entry with no edges
        if self.graph.entry().is_none() && self.graph.try_install_first_entry(ord, node_level) {
            for level in 0..=node_level {
                self.graph.ensure_node(level, ord);
            }
            return Ok(());
        }
        let (entry, entry_level) = self.graph.entry().expect("entry installed");

        // Cap fresh levels at one above the current top
        let node_level = node_level.min(entry_level + 1);

        // Publish empty sets for every joined level first, so concurrent
        // searches that reach this node mid-insert always find a list
        for level in 0..=node_level {
            self.graph.ensure_node(level, ord);
        }
        let scorer = self.provider.scorer_for_node(ord)?;

        // Greedy descent through the levels the new node does not join
        let mut seed = entry;
        for level in ((node_level + 1)..=entry_level).rev() {
            seed = greedy_step_down(self.graph.as_ref(), scorer.as_ref(), level, seed)?;
        }

        // Full beam per joined level, top down
        for level in (0..=node_level.min(entry_level)).rev() {
            let mut candidates = search_level(
                self.graph.as_ref(),
                scorer.as_ref(),
                level,
                seed,
                self.params.beam_width,
            )?;
            candidates.retain(|n| n != ord && !self.graph.is_deleted(n));

            let pruner = Pruner {
                provider: self.provider.as_ref(),
                alpha: self.params.alpha_diversity,
                max_degree: self.graph.max_degree_at(level),
            };
            let set = self.graph.ensure_node(level, ord);
            set.insert_diverse(ord, &candidates, &NodeArray::new(), &pruner)?;

            // Offer backlinks; overflowing lists prune themselves
            for (neighbor, score) in set.snapshot().iter() {
                if let Some(neighbor_set) = self.graph.neighbor_set(level, neighbor) {
                    neighbor_set.insert(neighbor, ord, score, &pruner)?;
                }
            }

            let next_seed = candidates.iter().next().map(|best| best.0);
            if let Some(best) = next_seed {
                seed = best;
            }
        }

        // Levels above the old top stay empty; the node becomes the entry
        if node_level > entry_level {
            self.graph.promote_entry(ord, node_level);
            debug!(ord, level = node_level, "promoted new entry node");
        }
        Ok(())
    }

    /// Marks `ord` deleted. Thread-safe and idempotent; the node stays
    /// navigable until [`GraphBuilder::cleanup`].
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for an ordinal never inserted.
    pub fn mark_node_deleted(&self, ord: NodeId) -> Result<()> {
        self.graph.check_ordinal(ord)?;
        if !self.graph.contains(ord) {
            return Err(Error::OutOfRange {
                ordinal: ord,
                upper_bound: self.graph.id_upper_bound(),
            });
        }
        self.graph.deleted().set(ord);
        Ok(())
    }

    /// Repairs the graph around tombstoned nodes and removes them.
    ///
    /// Runs concurrently with inserts and searches but serializes against
    /// itself. Per-node repair is parallel; each task only writes its own
    /// neighbor set.
    ///
    /// # Errors
    ///
    /// Propagates scorer failures from edge repair.
    pub fn cleanup(&self) -> Result<()> {
        let _guard = self.cleanup_lock.lock();

        // Degree enforcement: concurrent backlink offers may leave
        // published lists in the transient overflow zone; prune them back
        // so quiescent graphs satisfy the degree bound everywhere
        for level in 0..self.graph.layer_count() {
            let overfull: Vec<NodeId> = self
                .graph
                .ordinals(level)
                .into_iter()
                .filter(|&ord| {
                    self.graph
                        .neighbor_set(level, ord)
                        .is_some_and(|set| set.len() > set.max_degree())
                })
                .collect();
            overfull
                .par_iter()
                .try_for_each(|&ord| self.enforce_degree(level, ord))?;
        }

        let doomed: Vec<NodeId> = self
            .graph
            .deleted()
            .set_bits()
            .into_iter()
            .filter(|&ord| self.graph.contains(ord))
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }

        // Phase 1: strip dangling edges, backfill shortened lists
        for level in 0..self.graph.layer_count() {
            let survivors: Vec<NodeId> = self
                .graph
                .ordinals(level)
                .into_iter()
                .filter(|&ord| !self.graph.is_deleted(ord))
                .collect();
            survivors
                .par_iter()
                .try_for_each(|&ord| self.repair_node(level, ord))?;
        }

        // Phase 2: drop the nodes themselves
        for &ord in &doomed {
            self.graph.remove_node(ord);
            self.graph.deleted().clear(ord);
        }

        // Phase 3: re-elect the entry if it died
        if let Some((entry, _)) = self.graph.entry() {
            if doomed.contains(&entry) {
                self.elect_entry()?;
            }
        }

        info!(removed = doomed.len(), "cleanup removed deleted nodes");
        Ok(())
    }

    /// Runs [`GraphBuilder::cleanup`] and, when anything was removed,
    /// returns a dense old-to-new renumbering map for the surviving
    /// ordinals (holes eliminated). The in-memory graph keeps its original
    /// ordinals; the map is meant for [`crate::disk::write_graph`].
    ///
    /// # Errors
    ///
    /// Propagates [`GraphBuilder::cleanup`] failures.
    pub fn remove_deleted_nodes(&self) -> Result<Option<FxHashMap<NodeId, NodeId>>> {
        let before = self.graph.deleted().cardinality();
        self.cleanup()?;
        if before == 0 {
            return Ok(None);
        }
        let mut survivors = self.graph.ordinals(0);
        survivors.sort_unstable();
        let map = survivors
            .into_iter()
            .enumerate()
            .map(|(new, old)| (old, u32::try_from(new).expect("ordinals fit in u32")))
            .collect();
        Ok(Some(map))
    }

    /// Forces the entry point.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `ord` is not in the graph.
    pub fn set_entry_point(&self, ord: NodeId, level: usize) -> Result<()> {
        if !self.graph.contains(ord) {
            return Err(Error::OutOfRange {
                ordinal: ord,
                upper_bound: self.graph.id_upper_bound(),
            });
        }
        for l in 0..=level {
            self.graph.ensure_node(l, ord);
        }
        self.graph.set_entry(ord, level);
        Ok(())
    }

    /// Convenience: inserts every vector of `source` in ordinal order,
    /// cleans up, and hands back the finished graph.
    ///
    /// # Errors
    ///
    /// Propagates insertion and cleanup failures.
    pub fn build(&self, source: &dyn VectorSource) -> Result<Arc<OnHeapGraph>> {
        let mut scratch = vec![0.0f32; source.dimension()];
        for ord in 0..source.size() {
            let ord = u32::try_from(ord)
                .map_err(|_| Error::InvalidArgument("source too large".into()))?;
            source.get_into(ord, &mut scratch, 0)?;
            self.add_graph_node(ord, &scratch)?;
        }
        self.cleanup()?;
        Ok(Arc::clone(&self.graph))
    }

    /// Releases builder-side scratch. The graph itself lives on through
    /// the `Arc` returned by [`GraphBuilder::graph`].
    pub fn close(self) {
        debug!(
            size = self.graph.size(),
            layers = self.graph.layer_count(),
            "builder closed"
        );
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Geometric level sample: `floor(-ln(U) / ln(M))`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn sample_level(&self) -> usize {
        // Atomic xorshift64; contention only perturbs the stream
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let uniform = ((state >> 11) as f64 + 1.0) / (1u64 << 53) as f64;
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(15)
    }

    /// Prunes an overflowed published list back to its degree bound.
    fn enforce_degree(&self, level: usize, ord: NodeId) -> Result<()> {
        let Some(set) = self.graph.neighbor_set(level, ord) else {
            return Ok(());
        };
        let pruner = Pruner {
            provider: self.provider.as_ref(),
            alpha: self.params.alpha_diversity,
            max_degree: set.max_degree(),
        };
        set.insert_diverse(ord, &NodeArray::new(), &NodeArray::new(), &pruner)
    }

    /// Strips deleted neighbors from `ord`'s list and refills short lists
    /// with live nodes found by a local beam.
    fn repair_node(&self, level: usize, ord: NodeId) -> Result<()> {
        let Some(set) = self.graph.neighbor_set(level, ord) else {
            return Ok(());
        };
        let dropped = set.mark_dangling(self.graph.deleted());
        if dropped == 0 || set.len() >= set.max_degree() {
            return Ok(());
        }

        let scorer = self.provider.scorer_for_node(ord)?;
        let mut found = search_level(
            self.graph.as_ref(),
            scorer.as_ref(),
            level,
            ord,
            self.params.beam_width,
        )?;
        found.retain(|n| n != ord && !self.graph.is_deleted(n));

        let pruner = Pruner {
            provider: self.provider.as_ref(),
            alpha: self.params.alpha_diversity,
            max_degree: set.max_degree(),
        };
        set.insert_diverse(ord, &found, &NodeArray::new(), &pruner)
    }

    /// Entry re-election: random live sampling followed by a greedy ascent
    /// toward the sampled region's best-connected node.
    #[allow(clippy::cast_possible_truncation)]
    fn elect_entry(&self) -> Result<()> {
        let survivors = self.graph.ordinals(0);
        let Some(&fallback) = survivors.first() else {
            // Graph emptied out entirely
            return Ok(());
        };

        // Sample a handful of live nodes, keep the one that climbs best
        let mut state = self.rng_state.load(Ordering::Relaxed);
        let mut pick = fallback;
        for _ in 0..8 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let idx = (state as usize) % survivors.len();
            let candidate = survivors[idx];
            if !self.graph.is_deleted(candidate) {
                pick = candidate;
                break;
            }
        }
        self.rng_state.store(state, Ordering::Relaxed);

        // Ascend: search from the pick's own vector and take the best hit
        let scorer = self.provider.scorer_for_node(pick)?;
        let found = search_level(
            self.graph.as_ref(),
            scorer.as_ref(),
            0,
            pick,
            self.params.beam_width,
        )?;
        let new_entry = found
            .iter()
            .map(|(n, _)| n)
            .find(|&n| !self.graph.is_deleted(n))
            .unwrap_or(pick);

        // Keep the entry at the highest level it is present on
        let mut level = 0;
        for l in (0..self.graph.layer_count()).rev() {
            if self.graph.neighbor_set(l, new_entry).is_some() {
                level = l;
                break;
            }
        }
        self.graph.set_entry(new_entry, level);
        info!(entry = new_entry, level, "re-elected entry node");
        Ok(())
    }
}
