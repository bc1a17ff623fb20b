//! Similarity functions and the uniform score convention.
//!
//! Every similarity is converted to a *score* in which higher is better and
//! values are bounded: dot becomes `(1 + dot) / 2`, cosine becomes
//! `(1 + cos) / 2`, Euclidean becomes `1 / (1 + d^2)`. Graph construction,
//! search and pruning all operate on scores, never on raw similarities, so
//! the three metrics are interchangeable everywhere downstream.

use serde::{Deserialize, Serialize};

use crate::simd;

/// Similarity function for vector comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    /// Dot product (inner product). Best for maximum inner product search.
    Dot,

    /// Cosine similarity. Best for normalized text embeddings.
    Cosine,

    /// Euclidean distance. Best when magnitude matters.
    Euclidean,
}

impl Similarity {
    /// Computes the score between two vectors (higher is better).
    ///
    /// # Panics
    ///
    /// Panics if vectors have different dimensions.
    #[must_use]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "Vector dimensions must match");
        self.score_from_raw(self.raw(a, b))
    }

    /// Computes the untransformed similarity value.
    ///
    /// For `Euclidean` this is the *squared* distance, matching what
    /// [`Similarity::score_from_raw`] expects.
    #[must_use]
    pub fn raw(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Dot => simd::dot_product(a, b),
            Self::Cosine => simd::cosine_similarity(a, b),
            Self::Euclidean => simd::squared_l2(a, b),
        }
    }

    /// Applies the score transform to a raw similarity value.
    #[inline]
    #[must_use]
    pub fn score_from_raw(&self, raw: f32) -> f32 {
        match self {
            Self::Dot | Self::Cosine => (1.0 + raw) / 2.0,
            Self::Euclidean => 1.0 / (1.0 + raw),
        }
    }

    /// Scores a query against `packed` viewed as concatenated vectors.
    ///
    /// `packed.len()` must equal `query.len() * results.len()`; the score of
    /// the i-th packed vector is written to `results[i]`.
    ///
    /// # Panics
    ///
    /// Panics if `packed` is not exactly `results.len()` vectors of the
    /// query's dimension.
    pub fn compare_multi(&self, query: &[f32], packed: &[f32], results: &mut [f32]) {
        let dim = query.len();
        assert_eq!(
            packed.len(),
            dim * results.len(),
            "packed length must be results.len() vectors of the query dimension"
        );

        for (i, slot) in results.iter_mut().enumerate() {
            *slot = self.score(query, &packed[i * dim..(i + 1) * dim]);
        }
    }
}
