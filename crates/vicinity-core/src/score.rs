//! Score functions and build-time score providers.
//!
//! Score polymorphism is a capability set rather than a hierarchy: anything
//! that can answer `similarity_to(ordinal)` in the higher-is-better score
//! convention can drive the builder and searcher. Exact scorers read from a
//! [`VectorSource`]; approximate scorers read compressed representations
//! and report `is_exact() == false` so the searcher knows reranking still
//! applies.

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pq::{PqCodeStore, PrecomputedPqScorer, ProductQuantizer};
use crate::similarity::Similarity;
use crate::vectors::VectorSource;
use crate::NodeId;

/// A score function keyed by ordinal, higher is better.
///
/// Implementations are moved to the thread running a search (`Send`), not
/// shared across threads; interior scratch is allowed.
pub trait ScoreFn: Send {
    /// Score of the query against `node`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown ordinal, `Io` when backing storage fails.
    fn similarity_to(&self, node: NodeId) -> Result<f32>;

    /// True when `bulk_similarity_to` is cheaper than repeated single calls.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Scores a batch of ordinals into `out`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ScoreFn::similarity_to`].
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than `nodes`.
    fn bulk_similarity_to(&self, nodes: &[NodeId], out: &mut [f32]) -> Result<()> {
        for (i, &node) in nodes.iter().enumerate() {
            out[i] = self.similarity_to(node)?;
        }
        Ok(())
    }

    /// True when scores are exact (no compression error).
    fn is_exact(&self) -> bool;

    /// Hint that the searcher is about to score the neighbors of `node`.
    ///
    /// Lets layouts that store scoring state per neighbor list (fused ADC)
    /// stage the right block; everything else ignores it.
    ///
    /// # Errors
    ///
    /// `Io` when staging reads from backing storage fail.
    fn begin_expansion(&self, _node: NodeId) -> Result<()> {
        Ok(())
    }
}

/// Exact scorer reading full vectors from a [`VectorSource`].
pub struct ExactScoreFn {
    source: Arc<dyn VectorSource>,
    similarity: Similarity,
    query: Vec<f32>,
    scratch: RefCell<Vec<f32>>,
}

impl ExactScoreFn {
    /// Creates an exact scorer for `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the query dimension does not match the
    /// source.
    pub fn new(
        source: Arc<dyn VectorSource>,
        similarity: Similarity,
        query: Vec<f32>,
    ) -> Result<Self> {
        if query.len() != source.dimension() {
            return Err(Error::InvalidArgument(format!(
                "query dimension {} does not match source dimension {}",
                query.len(),
                source.dimension()
            )));
        }
        let dim = query.len();
        Ok(Self {
            source,
            similarity,
            query,
            scratch: RefCell::new(vec![0.0; dim]),
        })
    }
}

impl ScoreFn for ExactScoreFn {
    fn similarity_to(&self, node: NodeId) -> Result<f32> {
        let mut scratch = self.scratch.borrow_mut();
        self.source.get_into(node, &mut scratch, 0)?;
        Ok(self.similarity.score(&self.query, &scratch))
    }

    fn is_exact(&self) -> bool {
        true
    }
}

/// Supplies scorers and rerankers to the graph builder.
///
/// The builder asks for a *search* scorer per inserted node (possibly
/// approximate), a *diversity* scorer per pruning base (always exact, so
/// edge selection is not corrupted by compression noise), and optionally a
/// reranker.
pub trait BuildScoreProvider: Send + Sync {
    /// Vector dimension this provider scores in.
    fn dimension(&self) -> usize;

    /// Search scorer for an arbitrary query vector.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on dimension mismatch.
    fn scorer_for_vector(&self, query: &[f32]) -> Result<Box<dyn ScoreFn>>;

    /// Search scorer seeded with a node's own vector.
    ///
    /// Used when inserting `node`: the insertion beam searches for the
    /// node's neighbors with the node itself as the query.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown ordinal.
    fn scorer_for_node(&self, node: NodeId) -> Result<Box<dyn ScoreFn>>;

    /// Exact scorer from `node` used by diversity pruning.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown ordinal.
    fn diversity_scorer(&self, node: NodeId) -> Result<Box<dyn ScoreFn>>;

    /// Exact reranker for a query, when the search scorer is approximate.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on dimension mismatch.
    fn reranker_for(&self, query: &[f32]) -> Result<Option<Box<dyn ScoreFn>>>;
}

/// Exact in-memory provider: search and diversity both score from vectors.
pub struct ExactBuildScoreProvider {
    source: Arc<dyn VectorSource>,
    similarity: Similarity,
}

impl ExactBuildScoreProvider {
    /// Creates a provider over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn VectorSource>, similarity: Similarity) -> Self {
        Self { source, similarity }
    }
}

impl BuildScoreProvider for ExactBuildScoreProvider {
    fn dimension(&self) -> usize {
        self.source.dimension()
    }

    fn scorer_for_vector(&self, query: &[f32]) -> Result<Box<dyn ScoreFn>> {
        Ok(Box::new(ExactScoreFn::new(
            Arc::clone(&self.source),
            self.similarity,
            query.to_vec(),
        )?))
    }

    fn scorer_for_node(&self, node: NodeId) -> Result<Box<dyn ScoreFn>> {
        let query = self.source.get(node)?;
        self.scorer_for_vector(&query)
    }

    fn diversity_scorer(&self, node: NodeId) -> Result<Box<dyn ScoreFn>> {
        self.scorer_for_node(node)
    }

    fn reranker_for(&self, _query: &[f32]) -> Result<Option<Box<dyn ScoreFn>>> {
        // Search is already exact; nothing to correct
        Ok(None)
    }
}

/// PQ provider: approximate search scoring, exact diversity and reranking.
pub struct PqBuildScoreProvider {
    source: Arc<dyn VectorSource>,
    similarity: Similarity,
    pq: Arc<ProductQuantizer>,
    codes: Arc<PqCodeStore>,
}

impl PqBuildScoreProvider {
    /// Creates a provider, encoding every vector of `source` up front.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the quantizer dimension does not match
    /// the source.
    pub fn new(
        source: Arc<dyn VectorSource>,
        similarity: Similarity,
        pq: Arc<ProductQuantizer>,
    ) -> Result<Self> {
        if pq.dimension() != source.dimension() {
            return Err(Error::InvalidArgument(format!(
                "quantizer dimension {} does not match source dimension {}",
                pq.dimension(),
                source.dimension()
            )));
        }
        let codes = Arc::new(pq.encode_all(source.as_ref())?);
        Ok(Self {
            source,
            similarity,
            pq,
            codes,
        })
    }

    /// The encoded form of every source vector, keyed by ordinal.
    #[must_use]
    pub fn codes(&self) -> &Arc<PqCodeStore> {
        &self.codes
    }
}

impl BuildScoreProvider for PqBuildScoreProvider {
    fn dimension(&self) -> usize {
        self.source.dimension()
    }

    fn scorer_for_vector(&self, query: &[f32]) -> Result<Box<dyn ScoreFn>> {
        Ok(Box::new(PrecomputedPqScorer::new(
            Arc::clone(&self.pq),
            Arc::clone(&self.codes),
            self.similarity,
            query,
        )?))
    }

    fn scorer_for_node(&self, node: NodeId) -> Result<Box<dyn ScoreFn>> {
        let query = self.source.get(node)?;
        self.scorer_for_vector(&query)
    }

    fn diversity_scorer(&self, node: NodeId) -> Result<Box<dyn ScoreFn>> {
        let query = self.source.get(node)?;
        Ok(Box::new(ExactScoreFn::new(
            Arc::clone(&self.source),
            self.similarity,
            query,
        )?))
    }

    fn reranker_for(&self, query: &[f32]) -> Result<Option<Box<dyn ScoreFn>>> {
        Ok(Some(Box::new(ExactScoreFn::new(
            Arc::clone(&self.source),
            self.similarity,
            query.to_vec(),
        )?)))
    }
}
