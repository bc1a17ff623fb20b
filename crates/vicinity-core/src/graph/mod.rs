//! Concurrent graph construction and beam search.
//!
//! The graph is inherently cyclic, so nothing here owns anything by edge:
//! all references are ordinals into a sharded adjacency table, and every
//! neighbor list is an immutable snapshot published by pointer swap.
//!
//! # Module Organization
//!
//! - `neighbors`: per-node published neighbor sets (RCU over [`NodeArray`])
//! - `diversity`: RobustPrune edge selection
//! - `on_heap`: the mutable in-memory graph (layers, entry, deletions)
//! - `builder`: incremental insertion, deletion, cleanup
//! - `search`: best-first beam search, resume, threshold mode

mod builder;
mod diversity;
mod neighbors;
mod on_heap;
mod search;

#[cfg(test)]
mod neighbors_tests;
#[cfg(test)]
mod search_tests;

pub use builder::{BuilderParams, GraphBuilder};
pub use neighbors::NeighborSet;
pub use on_heap::OnHeapGraph;
pub use search::{GraphSearcher, SearchResult, SearcherParams};

use crate::bitset::{AtomicBitSet, FixedBitSet, GrowableBitSet};
use crate::error::Result;
use crate::NodeId;

/// Read access to a graph topology, on-heap or on-disk.
///
/// The searcher is written against this seam so the same traversal serves
/// the builder's in-memory graph, a memory-mapped index, and a cached view.
pub trait GraphView: Send + Sync {
    /// The global entry node and the level it lives at.
    fn entry(&self) -> Option<(NodeId, usize)>;

    /// Number of nodes present at layer 0.
    fn size(&self) -> usize;

    /// Exclusive upper bound of the ordinal space (holes included).
    fn id_upper_bound(&self) -> u32;

    /// True when `node` exists at layer 0.
    fn contains(&self, node: NodeId) -> bool;

    /// Copies the neighbors of `node` at `level` into `out`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown ordinal, `Io`/`Corrupt` from backing
    /// storage.
    fn neighbors_into(&self, level: usize, node: NodeId, out: &mut Vec<NodeId>) -> Result<()>;
}

/// Membership filter for search results.
///
/// Searches only admit nodes the filter accepts; traversal still crosses
/// rejected nodes, mirroring how tombstoned nodes stay navigable until
/// cleanup. Callers wanting deleted nodes filtered must fold the deletion
/// set into their mask.
pub trait AcceptBits {
    /// True when `node` may appear in results.
    fn accepts(&self, node: NodeId) -> bool;
}

/// Accepts every node.
pub struct AcceptAll;

impl AcceptBits for AcceptAll {
    fn accepts(&self, _node: NodeId) -> bool {
        true
    }
}

impl AcceptBits for FixedBitSet {
    fn accepts(&self, node: NodeId) -> bool {
        self.get(node)
    }
}

impl AcceptBits for GrowableBitSet {
    fn accepts(&self, node: NodeId) -> bool {
        self.get(node)
    }
}

impl AcceptBits for AtomicBitSet {
    fn accepts(&self, node: NodeId) -> bool {
        self.get(node)
    }
}

/// Accepts nodes not marked in the wrapped deletion set.
///
/// The usual composition for "everything still alive".
pub struct AcceptNotDeleted<'a>(pub &'a AtomicBitSet);

impl AcceptBits for AcceptNotDeleted<'_> {
    fn accepts(&self, node: NodeId) -> bool {
        !self.0.get(node)
    }
}
