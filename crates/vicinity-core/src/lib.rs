//! # Vicinity Core
//!
//! Embedded DiskANN-style approximate nearest neighbor search engine.
//!
//! Vicinity builds a navigable small-world graph over real-valued vectors,
//! searches it with a resumable best-first beam, compresses vectors with
//! product quantization for memory-resident approximate scoring, and
//! persists the whole index in a versioned memory-mapped file format for
//! datasets larger than RAM.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vicinity_core::{BuilderParams, ExactBuildScoreProvider, GraphBuilder,
//!                     GraphSearcher, Similarity, SliceVectorSource};
//! use std::sync::Arc;
//!
//! let source = Arc::new(SliceVectorSource::from_vecs(vectors)?);
//! let provider = Arc::new(ExactBuildScoreProvider::new(source.clone(), Similarity::Cosine));
//! let builder = GraphBuilder::new(provider, BuilderParams::default())?;
//! let graph = builder.build(source.as_ref())?;
//!
//! let mut searcher = GraphSearcher::new(graph);
//! let result = searcher.search(scorer, None, 10, 10, &AcceptAll)?;
//! ```
//!
//! ## Architecture
//!
//! - [`graph`]: concurrent incremental builder and beam searcher
//! - [`pq`]: product quantization (training, encoding, approximate scoring)
//! - [`disk`]: versioned on-disk index format, memory-mapped reader, cache
//! - [`simd`]: runtime-dispatched float kernels

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bitset;
pub mod disk;
pub mod error;
pub mod graph;
pub mod node_array;
pub mod node_queue;
pub mod nvq;
pub mod pq;
pub mod score;
pub mod simd;
pub mod simd_dispatch;
pub mod simd_explicit;
pub mod similarity;
pub mod vectors;

#[cfg(test)]
mod node_queue_tests;
#[cfg(test)]
mod nvq_tests;
#[cfg(test)]
mod simd_tests;
#[cfg(test)]
mod vectors_tests;

pub use bitset::{AtomicBitSet, FixedBitSet, GrowableBitSet, NO_MORE};
pub use error::{Error, Result};
pub use graph::{
    AcceptAll, BuilderParams, GraphBuilder, GraphSearcher, GraphView, OnHeapGraph, SearchResult,
    SearcherParams,
};
pub use node_array::NodeArray;
pub use nvq::NvqQuantizer;
pub use pq::{PqParams, ProductQuantizer};
pub use score::{BuildScoreProvider, ExactBuildScoreProvider, PqBuildScoreProvider, ScoreFn};
pub use similarity::Similarity;
pub use vectors::{SliceVectorSource, VectorSource};

/// Ordinal identifying a node in the graph.
///
/// Ordinals are dense small integers in `[0, id_upper_bound)`; holes are
/// permitted after deletion or renumbering.
pub type NodeId = u32;
