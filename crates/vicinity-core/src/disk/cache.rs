//! Breadth-first preload of the top of an on-disk graph.
//!
//! Every search enters the graph through the same few nodes, so caching
//! the entry's neighborhood to a small depth keeps the hottest records and
//! vectors out of page-fault territory. The cache is built once at load
//! time and never evicts; its size is bounded by the BFS depth.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

use super::reader::{OnDiskGraph, OnDiskView};
use crate::error::Result;
use crate::graph::GraphView;
use crate::NodeId;

/// Default BFS preload depth.
pub const DEFAULT_CACHE_DEPTH: usize = 3;

struct CachedNode {
    neighbors: Vec<NodeId>,
    /// Absent when the file stores no vector feature.
    vector: Option<Vec<f32>>,
}

/// Preloaded `(neighbors, vector)` pairs for the top of the graph.
pub struct GraphCache {
    map: FxHashMap<NodeId, CachedNode>,
    depth: usize,
}

impl GraphCache {
    /// Walks layer 0 breadth-first from the entry node to `depth` hops and
    /// caches every visited node.
    ///
    /// # Errors
    ///
    /// Propagates record read failures; an empty graph yields an empty
    /// cache.
    pub fn preload(graph: &OnDiskGraph, depth: usize) -> Result<Self> {
        let view = graph.view();
        let mut map = FxHashMap::default();

        let Some((entry, _)) = view.entry() else {
            return Ok(Self { map, depth });
        };

        let has_vectors = view.get_vector(entry).is_ok();
        let mut frontier = VecDeque::new();
        frontier.push_back((entry, 0usize));
        let mut neighbors = Vec::new();

        while let Some((node, hops)) = frontier.pop_front() {
            if map.contains_key(&node) {
                continue;
            }
            view.neighbors_into(0, node, &mut neighbors)?;
            let vector = if has_vectors {
                Some(view.get_vector(node)?)
            } else {
                None
            };
            if hops < depth {
                for &n in &neighbors {
                    if !map.contains_key(&n) {
                        frontier.push_back((n, hops + 1));
                    }
                }
            }
            map.insert(
                node,
                CachedNode {
                    neighbors: neighbors.clone(),
                    vector,
                },
            );
        }

        debug!(nodes = map.len(), depth, "preloaded graph cache");
        Ok(Self { map, depth })
    }

    /// The BFS depth this cache was built with.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of cached nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when nothing was cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Cached neighbor list of `node`, if present.
    #[must_use]
    pub fn neighbors(&self, node: NodeId) -> Option<&[NodeId]> {
        self.map.get(&node).map(|c| c.neighbors.as_slice())
    }

    /// Cached vector of `node`, if present.
    #[must_use]
    pub fn vector(&self, node: NodeId) -> Option<&[f32]> {
        self.map.get(&node).and_then(|c| c.vector.as_deref())
    }
}

/// A view that consults the cache before the mapping.
#[derive(Clone, Copy)]
pub struct CachedGraphView<'a> {
    view: OnDiskView<'a>,
    cache: &'a GraphCache,
}

impl<'a> CachedGraphView<'a> {
    /// Wraps `view` with `cache`.
    #[must_use]
    pub fn new(view: OnDiskView<'a>, cache: &'a GraphCache) -> Self {
        Self { view, cache }
    }

    /// Returns the vector of `ord`, cache first.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`OnDiskView::get_vector`].
    pub fn get_vector(&self, ord: NodeId) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.vector(ord) {
            return Ok(vector.to_vec());
        }
        self.view.get_vector(ord)
    }
}

impl GraphView for CachedGraphView<'_> {
    fn entry(&self) -> Option<(NodeId, usize)> {
        self.view.entry()
    }

    fn size(&self) -> usize {
        self.view.size()
    }

    fn id_upper_bound(&self) -> u32 {
        self.view.id_upper_bound()
    }

    fn contains(&self, node: NodeId) -> bool {
        self.view.contains(node)
    }

    fn neighbors_into(&self, level: usize, node: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        if level == 0 {
            if let Some(cached) = self.cache.neighbors(node) {
                out.clear();
                out.extend_from_slice(cached);
                return Ok(());
            }
        }
        self.view.neighbors_into(level, node, out)
    }
}
