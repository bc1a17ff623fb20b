//! Published per-node neighbor sets.
//!
//! Each node's neighbor list is an immutable [`NodeArray`] behind an
//! [`ArcSwap`]. Readers take an acquire snapshot and never block; writers
//! run an optimistic read-copy-update loop and publish with a
//! compare-and-swap, retrying when another writer got there first. Updates
//! to different nodes never serialize.

use arc_swap::ArcSwap;
use std::sync::Arc;

use super::diversity::Pruner;
use crate::bitset::AtomicBitSet;
use crate::error::Result;
use crate::node_array::NodeArray;
use crate::NodeId;

/// A node's published neighbor list plus its degree policy.
pub struct NeighborSet {
    published: ArcSwap<NodeArray>,
    max_degree: usize,
    /// Transient overflow allowance: `ceil(alpha_overflow * max_degree)`.
    overflow_cap: usize,
}

impl NeighborSet {
    /// Creates an empty set with the given degree bound and overflow factor.
    #[must_use]
    pub fn new(max_degree: usize, alpha_overflow: f32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let overflow_cap = (alpha_overflow * max_degree as f32).ceil() as usize;
        Self {
            published: ArcSwap::from_pointee(NodeArray::new()),
            max_degree,
            overflow_cap: overflow_cap.max(max_degree),
        }
    }

    /// The degree bound this set enforces at publication points.
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Acquire snapshot of the published list.
    #[must_use]
    pub fn snapshot(&self) -> Arc<NodeArray> {
        self.published.load_full()
    }

    /// Number of published neighbors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.load().len()
    }

    /// True when no neighbors are published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.load().is_empty()
    }

    /// Offers `(node, score)` as a neighbor of `base`.
    ///
    /// The list may transiently exceed `max_degree` up to the overflow cap;
    /// crossing the cap triggers an immediate RobustPrune back to
    /// `max_degree` before publication. A node already present is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Propagates scoring failures from the pruner.
    pub fn insert(&self, base: NodeId, node: NodeId, score: f32, pruner: &Pruner<'_>) -> Result<()> {
        loop {
            let current = self.published.load_full();
            let mut next = (*current).clone();
            if next.insert_sorted(node, score).is_none() {
                return Ok(());
            }
            let next = if next.len() > self.overflow_cap {
                pruner.prune(base, &next)?
            } else {
                next
            };
            if self.try_publish(&current, next) {
                return Ok(());
            }
        }
    }

    /// Replaces the list with the diverse merge of the current neighbors,
    /// `natural` candidates (from the insertion beam) and `concurrent`
    /// candidates (discovered by racing inserts).
    ///
    /// # Errors
    ///
    /// Propagates scoring failures from the pruner.
    pub fn insert_diverse(
        &self,
        base: NodeId,
        natural: &NodeArray,
        concurrent: &NodeArray,
        pruner: &Pruner<'_>,
    ) -> Result<()> {
        loop {
            let current = self.published.load_full();
            let merged = NodeArray::merge(&NodeArray::merge(&current, natural), concurrent);
            let pruned = pruner.prune(base, &merged)?;
            if self.try_publish(&current, pruned) {
                return Ok(());
            }
        }
    }

    /// Drops entries whose ordinal is marked in `removed`.
    ///
    /// Returns how many entries were dropped so cleanup can decide whether
    /// to backfill.
    pub fn mark_dangling(&self, removed: &AtomicBitSet) -> usize {
        loop {
            let current = self.published.load_full();
            let mut next = (*current).clone();
            let dropped = next.retain(|node| !removed.get(node));
            if dropped == 0 {
                return 0;
            }
            if self.try_publish(&current, next) {
                return dropped;
            }
        }
    }

    /// Publishes `list` unconditionally (cleanup backfill path).
    pub fn overwrite(&self, list: NodeArray) {
        self.published.store(Arc::new(list));
    }

    fn try_publish(&self, expected: &Arc<NodeArray>, next: NodeArray) -> bool {
        let previous = self
            .published
            .compare_and_swap(expected, Arc::new(next));
        Arc::ptr_eq(&previous, expected)
    }
}
