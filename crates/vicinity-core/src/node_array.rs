//! Score-ordered node arrays.
//!
//! A [`NodeArray`] keeps parallel `(node, score)` arrays sorted by score
//! descending, ties broken by smallest ordinal. It is the payload of every
//! published neighbor list and the working set of diversity pruning, so
//! ordering and deduplication here are what the graph invariants rest on.

use crate::NodeId;

/// Bounded array of `(node, score)` pairs sorted by score descending.
///
/// Ties are broken by smallest ordinal first, which makes merges and the
/// search results that flow from them deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeArray {
    nodes: Vec<NodeId>,
    scores: Vec<f32>,
}

impl NodeArray {
    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty array with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            scores: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the array holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[inline]
    #[must_use]
    pub fn node(&self, i: usize) -> NodeId {
        self.nodes[i]
    }

    /// Score at position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[inline]
    #[must_use]
    pub fn score(&self, i: usize) -> f32 {
        self.scores[i]
    }

    /// Iterates `(node, score)` pairs best first.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f32)> + '_ {
        self.nodes.iter().copied().zip(self.scores.iter().copied())
    }

    /// The node ids as a slice, best first.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Appends an entry that is already in order.
    ///
    /// Debug builds assert the score sequence stays monotone (descending,
    /// ties by ascending ordinal).
    pub fn add_in_order(&mut self, node: NodeId, score: f32) {
        debug_assert!(
            self.nodes.last().is_none_or(|&last_node| {
                let last_score = *self.scores.last().unwrap();
                score < last_score || (score == last_score && node > last_node)
            }),
            "add_in_order called out of order: ({node}, {score})"
        );
        self.nodes.push(node);
        self.scores.push(score);
    }

    /// Inserts keeping sort order; duplicates by node are rejected.
    ///
    /// Returns the insertion index, or `None` if `node` is already present
    /// (regardless of its stored score).
    pub fn insert_sorted(&mut self, node: NodeId, score: f32) -> Option<usize> {
        if self.contains(node) {
            return None;
        }
        let idx = self.insertion_point(node, score);
        self.nodes.insert(idx, node);
        self.scores.insert(idx, score);
        Some(idx)
    }

    /// Removes the entry at `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    pub fn remove_index(&mut self, i: usize) {
        self.nodes.remove(i);
        self.scores.remove(i);
    }

    /// Removes the worst entry, if any.
    pub fn remove_last(&mut self) {
        self.nodes.pop();
        self.scores.pop();
    }

    /// Keeps only entries whose node satisfies the predicate.
    ///
    /// Returns the number of entries removed.
    pub fn retain(&mut self, mut keep: impl FnMut(NodeId) -> bool) -> usize {
        let before = self.nodes.len();
        let mut write = 0;
        for read in 0..before {
            if keep(self.nodes[read]) {
                self.nodes.swap(write, read);
                self.scores.swap(write, read);
                write += 1;
            }
        }
        self.nodes.truncate(write);
        self.scores.truncate(write);
        before - write
    }

    /// Returns true if `node` is present.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Truncates to at most `len` entries, dropping the worst.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
        self.scores.truncate(len);
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.scores.clear();
    }

    /// Merges two sorted arrays into a new sorted array.
    ///
    /// Duplicates are eliminated by node, keeping the higher score; the
    /// result is sorted by score descending with ties by ascending ordinal,
    /// so merging is deterministic.
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut out = Self::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() || j < b.len() {
            let take_a = match (i < a.len(), j < b.len()) {
                (true, false) => true,
                (false, true) => false,
                (true, true) => Self::ordered_before(a.nodes[i], a.scores[i], b.nodes[j], b.scores[j]),
                (false, false) => unreachable!(),
            };
            let (node, score) = if take_a {
                i += 1;
                (a.nodes[i - 1], a.scores[i - 1])
            } else {
                j += 1;
                (b.nodes[j - 1], b.scores[j - 1])
            };
            // First occurrence wins; it carries the higher score because the
            // walk emits entries in descending score order
            if !out.contains(node) {
                out.nodes.push(node);
                out.scores.push(score);
            }
        }
        out
    }

    /// True when `(node_a, score_a)` sorts before `(node_b, score_b)`.
    #[inline]
    fn ordered_before(node_a: NodeId, score_a: f32, node_b: NodeId, score_b: f32) -> bool {
        match score_a.total_cmp(&score_b) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => node_a <= node_b,
        }
    }

    fn insertion_point(&self, node: NodeId, score: f32) -> usize {
        self.nodes
            .iter()
            .zip(self.scores.iter())
            .position(|(&n, &s)| !Self::ordered_before(n, s, node, score))
            .unwrap_or(self.nodes.len())
    }
}

impl FromIterator<(NodeId, f32)> for NodeArray {
    /// Collects arbitrary pairs into a sorted, deduplicated array.
    fn from_iter<T: IntoIterator<Item = (NodeId, f32)>>(iter: T) -> Self {
        let mut pairs: Vec<(NodeId, f32)> = iter.into_iter().collect();
        pairs.sort_by(|(na, sa), (nb, sb)| {
            sb.total_cmp(sa).then_with(|| na.cmp(nb))
        });
        let mut out = Self::with_capacity(pairs.len());
        for (node, score) in pairs {
            if !out.contains(node) {
                out.nodes.push(node);
                out.scores.push(score);
            }
        }
        out
    }
}
