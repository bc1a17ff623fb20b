//! The mutable in-memory graph.
//!
//! Adjacency is a sharded concurrent map per layer (ordinal to published
//! neighbor set), so updates to different nodes never serialize. Layer 0
//! holds every node; higher layers are geometric subsets used only to seed
//! the beam. Deletions are tombstones in a lock-free bit set until
//! `cleanup` repairs the topology.

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::neighbors::NeighborSet;
use super::GraphView;
use crate::bitset::AtomicBitSet;
use crate::error::{Error, Result};
use crate::node_array::NodeArray;
use crate::NodeId;

/// Sharded ordinal-to-neighbor-set map.
type AdjacencyMap = DashMap<NodeId, Arc<NeighborSet>, FxBuildHasher>;

/// One layer's adjacency.
pub(crate) struct LayerAdjacency {
    pub(crate) nodes: AdjacencyMap,
}

impl LayerAdjacency {
    fn new() -> Self {
        Self {
            nodes: AdjacencyMap::default(),
        }
    }
}

/// In-memory graph produced by the builder and consumed by the writer.
pub struct OnHeapGraph {
    /// Layer adjacency, index = level. Guarded for layer-count growth only;
    /// per-node updates go through the sharded maps.
    layers: RwLock<Vec<Arc<LayerAdjacency>>>,
    /// Entry node and the level it lives at.
    entry: RwLock<Option<(NodeId, usize)>>,
    /// Tombstones; nodes stay navigable until cleanup.
    deleted: AtomicBitSet,
    id_upper_bound: AtomicU32,
    base_degree: usize,
    alpha_overflow: f32,
}

impl OnHeapGraph {
    pub(crate) fn new(base_degree: usize, alpha_overflow: f32) -> Self {
        Self {
            layers: RwLock::new(vec![Arc::new(LayerAdjacency::new())]),
            entry: RwLock::new(None),
            deleted: AtomicBitSet::with_capacity(1024),
            id_upper_bound: AtomicU32::new(0),
            base_degree,
            alpha_overflow,
        }
    }

    /// The degree bound at `level`: the base degree at layer 0, halving
    /// per level above it.
    #[must_use]
    pub fn max_degree_at(&self, level: usize) -> usize {
        if level == 0 {
            self.base_degree
        } else {
            (self.base_degree >> level).max(2)
        }
    }

    /// Number of layers currently allocated.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.read().len()
    }

    /// Nodes present at `level`, unordered.
    #[must_use]
    pub fn ordinals(&self, level: usize) -> Vec<NodeId> {
        self.layer(level)
            .map(|layer| layer.nodes.iter().map(|e| *e.key()).collect())
            .unwrap_or_default()
    }

    /// The deletion tombstone set.
    #[must_use]
    pub fn deleted(&self) -> &AtomicBitSet {
        &self.deleted
    }

    /// True when `node` carries a tombstone.
    #[must_use]
    pub fn is_deleted(&self, node: NodeId) -> bool {
        self.deleted.get(node)
    }

    /// Snapshot of `node`'s neighbor list at `level`, scores included.
    #[must_use]
    pub fn neighbors(&self, level: usize, node: NodeId) -> Option<Arc<NodeArray>> {
        self.neighbor_set(level, node).map(|set| set.snapshot())
    }

    pub(crate) fn layer(&self, level: usize) -> Option<Arc<LayerAdjacency>> {
        self.layers.read().get(level).cloned()
    }

    pub(crate) fn neighbor_set(&self, level: usize, node: NodeId) -> Option<Arc<NeighborSet>> {
        self.layer(level)
            .and_then(|layer| layer.nodes.get(&node).map(|entry| Arc::clone(entry.value())))
    }

    /// Inserts an empty neighbor set for `node` at `level`, growing the
    /// layer vector as needed. Returns the set (existing or fresh).
    pub(crate) fn ensure_node(&self, level: usize, node: NodeId) -> Arc<NeighborSet> {
        self.note_id(node);
        let layer = {
            let mut layers = self.layers.write();
            while layers.len() <= level {
                layers.push(Arc::new(LayerAdjacency::new()));
            }
            Arc::clone(&layers[level])
        };
        let set = Arc::clone(
            layer
                .nodes
                .entry(node)
                .or_insert_with(|| {
                    Arc::new(NeighborSet::new(self.max_degree_at(level), self.alpha_overflow))
                })
                .value(),
        );
        set
    }

    /// Removes `node` from every layer. Used by cleanup.
    pub(crate) fn remove_node(&self, node: NodeId) {
        let layers: Vec<Arc<LayerAdjacency>> = self.layers.read().clone();
        for layer in layers {
            layer.nodes.remove(&node);
        }
    }

    /// Records `ord` in the id space.
    pub(crate) fn note_id(&self, ord: NodeId) {
        self.id_upper_bound
            .fetch_max(ord.saturating_add(1), Ordering::AcqRel);
    }

    /// Installs `node` as entry if the graph has none yet.
    ///
    /// Returns true when this call won the installation race.
    pub(crate) fn try_install_first_entry(&self, node: NodeId, level: usize) -> bool {
        let mut entry = self.entry.write();
        if entry.is_some() {
            return false;
        }
        *entry = Some((node, level));
        true
    }

    /// Promotes `node` to entry if `level` exceeds the current entry level.
    pub(crate) fn promote_entry(&self, node: NodeId, level: usize) {
        let mut entry = self.entry.write();
        match *entry {
            Some((_, current_level)) if level <= current_level => {}
            _ => *entry = Some((node, level)),
        }
    }

    /// Forces the entry node, for explicit re-election.
    pub(crate) fn set_entry(&self, node: NodeId, level: usize) {
        *self.entry.write() = Some((node, level));
    }

    /// Validates `ord` against the id space.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `ord` was never inserted.
    pub fn check_ordinal(&self, ord: NodeId) -> Result<()> {
        Error::check_ordinal(ord, self.id_upper_bound())
    }
}

impl GraphView for OnHeapGraph {
    fn entry(&self) -> Option<(NodeId, usize)> {
        *self.entry.read()
    }

    fn size(&self) -> usize {
        self.layer(0).map_or(0, |layer| layer.nodes.len())
    }

    fn id_upper_bound(&self) -> u32 {
        self.id_upper_bound.load(Ordering::Acquire)
    }

    fn contains(&self, node: NodeId) -> bool {
        self.layer(0)
            .is_some_and(|layer| layer.nodes.contains_key(&node))
    }

    fn neighbors_into(&self, level: usize, node: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        out.clear();
        Error::check_ordinal(node, self.id_upper_bound())?;
        // A node a concurrent cleanup just removed reads as edgeless;
        // in-flight traversals cross it instead of failing
        if let Some(set) = self.neighbor_set(level, node) {
            out.extend_from_slice(set.snapshot().nodes());
        }
        Ok(())
    }
}
