//! Approximate scorers over PQ-encoded vectors.
//!
//! Two trade-offs of the same arithmetic:
//!
//! - [`PrecomputedPqScorer`] builds an `M x K` table of per-subspace
//!   partial similarities once per query, then scores any encoded vector
//!   with `M` table lookups. Right when one query scores many candidates.
//! - [`LazyPqScorer`] computes partials per call. Right when a query only
//!   ever scores a handful of candidates, e.g. diversity spot checks.

use std::sync::Arc;

use super::{PqCodeStore, ProductQuantizer};
use crate::error::{Error, Result};
use crate::score::ScoreFn;
use crate::simd;
use crate::similarity::Similarity;
use crate::NodeId;

/// Per-query partial-sum tables shared by the precomputed and fused-ADC
/// scoring paths.
pub(crate) struct AdcPartials {
    /// `m * k` main partials: dot terms, or squared-distance terms.
    pub table: Vec<f32>,
    /// `m * k` squared partial magnitudes of reconstructed subvectors;
    /// present only for cosine.
    pub mag: Option<Vec<f32>>,
    /// `dot(query, global_centroid)` correction for dot similarity.
    pub bias: f32,
    /// Query L2 norm, used by cosine.
    pub query_norm: f32,
    pub similarity: Similarity,
    pub m: usize,
    pub k: usize,
}

impl AdcPartials {
    /// Builds the tables for `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub(crate) fn build(
        pq: &ProductQuantizer,
        similarity: Similarity,
        query: &[f32],
    ) -> Result<Self> {
        if query.len() != pq.dimension() {
            return Err(Error::InvalidArgument(format!(
                "query dimension {} does not match quantizer dimension {}",
                query.len(),
                pq.dimension()
            )));
        }
        let m = pq.subspaces();
        let k = pq.centroids_per_subspace();
        let global = pq.global_centroid();

        // Euclidean compares against centered residuals, so center the query
        let mut centered;
        let effective_query = match (similarity, global) {
            (Similarity::Euclidean, Some(g)) => {
                centered = query.to_vec();
                simd::sub_in_place(&mut centered, g);
                &centered[..]
            }
            _ => query,
        };

        let mut table = vec![0.0f32; m * k];
        let mut mag = matches!(similarity, Similarity::Cosine).then(|| vec![0.0f32; m * k]);
        let mut reconstructed = Vec::new();

        for s in 0..m {
            let range = pq.sub_range(s);
            let q_sub = &effective_query[range.clone()];
            for c in 0..k {
                let code = u8::try_from(c).expect("k <= 256");
                let centroid = pq.centroid(s, code);
                // Reconstructed subvector includes the global centroid share
                let v_sub: &[f32] = if let Some(g) = global {
                    reconstructed.clear();
                    reconstructed.extend_from_slice(centroid);
                    simd::add_in_place(&mut reconstructed, &g[range.clone()]);
                    &reconstructed
                } else {
                    centroid
                };
                table[s * k + c] = match similarity {
                    // The global share enters through the bias term instead
                    Similarity::Dot => simd::dot_product(q_sub, centroid),
                    Similarity::Cosine => simd::dot_product(q_sub, v_sub),
                    // Centered query against the raw centroid residual
                    Similarity::Euclidean => simd::squared_l2(q_sub, centroid),
                };
                if let Some(mag) = &mut mag {
                    mag[s * k + c] = simd::dot_product(v_sub, v_sub);
                }
            }
        }

        Ok(Self {
            table,
            mag,
            bias: 0.0,
            query_norm: simd::norm(query),
            similarity,
            m,
            k,
        })
    }

    /// Folds summed partials into a final score.
    #[inline]
    pub(crate) fn finish(&self, main_sum: f32, mag_sum: f32) -> f32 {
        match self.similarity {
            Similarity::Dot => self.similarity.score_from_raw(self.bias + main_sum),
            Similarity::Euclidean => self.similarity.score_from_raw(main_sum),
            Similarity::Cosine => {
                let denom = self.query_norm * mag_sum.sqrt();
                if denom == 0.0 {
                    return self.similarity.score_from_raw(0.0);
                }
                self.similarity.score_from_raw(main_sum / denom)
            }
        }
    }

    /// Scores one code buffer via table lookups.
    #[inline]
    pub(crate) fn score_code(&self, code: &[u8]) -> f32 {
        let mut main_sum = 0.0f32;
        let mut mag_sum = 0.0f32;
        for (s, &byte) in code.iter().enumerate() {
            let idx = s * self.k + byte as usize;
            main_sum += self.table[idx];
            if let Some(mag) = &self.mag {
                mag_sum += mag[idx];
            }
        }
        self.finish(main_sum, mag_sum)
    }
}

/// Approximate scorer with a per-query precomputed partial-sum table.
pub struct PrecomputedPqScorer {
    codes: Arc<PqCodeStore>,
    partials: AdcPartials,
}

impl PrecomputedPqScorer {
    /// Builds the scorer's tables for `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub fn new(
        pq: Arc<ProductQuantizer>,
        codes: Arc<PqCodeStore>,
        similarity: Similarity,
        query: &[f32],
    ) -> Result<Self> {
        let mut partials = AdcPartials::build(&pq, similarity, query)?;
        if similarity == Similarity::Dot {
            if let Some(g) = pq.global_centroid() {
                partials.bias = simd::dot_product(query, g);
            }
        }
        Ok(Self { codes, partials })
    }
}

impl ScoreFn for PrecomputedPqScorer {
    fn similarity_to(&self, node: NodeId) -> Result<f32> {
        let code = self.codes.get(node).ok_or(Error::OutOfRange {
            ordinal: node,
            upper_bound: u32::try_from(self.codes.len()).unwrap_or(u32::MAX),
        })?;
        Ok(self.partials.score_code(code))
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    fn bulk_similarity_to(&self, nodes: &[NodeId], out: &mut [f32]) -> Result<()> {
        for (i, &node) in nodes.iter().enumerate() {
            out[i] = self.similarity_to(node)?;
        }
        Ok(())
    }

    fn is_exact(&self) -> bool {
        false
    }
}

/// Approximate scorer that decodes partials per call.
pub struct LazyPqScorer {
    pq: Arc<ProductQuantizer>,
    codes: Arc<PqCodeStore>,
    similarity: Similarity,
    query: Vec<f32>,
    /// Query minus the global centroid, prepared once for Euclidean.
    centered_query: Option<Vec<f32>>,
    query_norm: f32,
    bias: f32,
}

impl LazyPqScorer {
    /// Creates a lazy scorer for `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub fn new(
        pq: Arc<ProductQuantizer>,
        codes: Arc<PqCodeStore>,
        similarity: Similarity,
        query: &[f32],
    ) -> Result<Self> {
        if query.len() != pq.dimension() {
            return Err(Error::InvalidArgument(format!(
                "query dimension {} does not match quantizer dimension {}",
                query.len(),
                pq.dimension()
            )));
        }
        let centered_query = match (similarity, pq.global_centroid()) {
            (Similarity::Euclidean, Some(g)) => {
                let mut centered = query.to_vec();
                simd::sub_in_place(&mut centered, g);
                Some(centered)
            }
            _ => None,
        };
        let bias = match (similarity, pq.global_centroid()) {
            (Similarity::Dot, Some(g)) => simd::dot_product(query, g),
            _ => 0.0,
        };
        Ok(Self {
            query_norm: simd::norm(query),
            query: query.to_vec(),
            centered_query,
            similarity,
            bias,
            pq,
            codes,
        })
    }
}

impl ScoreFn for LazyPqScorer {
    fn similarity_to(&self, node: NodeId) -> Result<f32> {
        let code = self.codes.get(node).ok_or(Error::OutOfRange {
            ordinal: node,
            upper_bound: u32::try_from(self.codes.len()).unwrap_or(u32::MAX),
        })?;
        let global = self.pq.global_centroid();
        let mut main_sum = 0.0f32;
        let mut mag_sum = 0.0f32;
        let mut reconstructed = Vec::new();

        for (s, &byte) in code.iter().enumerate() {
            let range = self.pq.sub_range(s);
            let centroid = self.pq.centroid(s, byte);
            match self.similarity {
                Similarity::Euclidean => {
                    let q = self.centered_query.as_deref().unwrap_or(&self.query);
                    main_sum += simd::squared_l2(&q[range], centroid);
                }
                // The global share of a dot product enters through the bias
                Similarity::Dot => {
                    main_sum += simd::dot_product(&self.query[range], centroid);
                }
                Similarity::Cosine => {
                    let v_sub: &[f32] = if let Some(g) = global {
                        reconstructed.clear();
                        reconstructed.extend_from_slice(centroid);
                        simd::add_in_place(&mut reconstructed, &g[range.clone()]);
                        &reconstructed
                    } else {
                        centroid
                    };
                    main_sum += simd::dot_product(&self.query[range], v_sub);
                    mag_sum += simd::dot_product(v_sub, v_sub);
                }
            }
        }

        Ok(match self.similarity {
            Similarity::Dot => self.similarity.score_from_raw(self.bias + main_sum),
            Similarity::Euclidean => self.similarity.score_from_raw(main_sum),
            Similarity::Cosine => {
                let denom = self.query_norm * mag_sum.sqrt();
                if denom == 0.0 {
                    self.similarity.score_from_raw(0.0)
                } else {
                    self.similarity.score_from_raw(main_sum / denom)
                }
            }
        })
    }

    fn is_exact(&self) -> bool {
        false
    }
}
