//! Product quantization: training, encoding, approximate scoring.
//!
//! A vector of dimension `d` is split into `M` contiguous subvectors; each
//! subspace gets its own codebook of `K` centroids trained with k-means++.
//! An encoded vector is `M` bytes (one centroid index per subspace), small
//! enough to keep the whole dataset resident for approximate scoring while
//! exact vectors stay on disk.
//!
//! # Module Organization
//!
//! - `subspace`: contiguous subvector split arithmetic
//! - `kmeans`: weighted k-means++ / Lloyd engine
//! - `codebook`: [`ProductQuantizer`] training, encoding, persistence
//! - `scorer`: precomputed-table and lazy approximate scorers
//! - `fused`: transposed neighbor-code packing for bulk ADC scoring

mod codebook;
mod fused;
mod kmeans;
mod scorer;
mod subspace;

#[cfg(test)]
mod codebook_tests;
#[cfg(test)]
mod scorer_tests;

pub use codebook::{PqCodeStore, PqParams, ProductQuantizer};
pub use fused::{pack_neighbor_codes, AdcTable, FUSED_LANES};
pub use scorer::{LazyPqScorer, PrecomputedPqScorer};

pub(crate) use subspace::{prefix_offsets, split_dimension};
