//! On-disk index format: versioned writer, memory-mapped reader, cache.
//!
//! An index file is written once in a single streaming pass and is
//! read-only afterwards. The layout is little-endian throughout:
//!
//! ```text
//! MAGIC(4) VERSION(u32)
//! dimension(u32) entry_node(u32) layer_count(u32)
//! { size(u32) degree(u32) } per layer
//! id_upper_bound(u32) feature_bits(u32)
//! live-id bitmap (ceil(id_upper_bound / 8) bytes)
//! feature headers, FeatureId ascending
//! layer-0 records in ordinal order, holes zeroed:
//!   id(u32) inline-feature-blobs neighbor_count(u32) neighbor_ids(u32 x degree, -1 padded)
//! upper-layer records (same shape, no inline blobs), increasing level
//! separated feature blobs, one record per live ordinal, at header offsets
//! ```
//!
//! # Module Organization
//!
//! - `format`: magic, versions, feature ids, header codec
//! - `features`: pluggable per-node payloads (vectors, fused ADC, NVQ)
//! - `writer`: single-pass streaming writer with optional renumbering
//! - `reader`: shared-mapping reader, views, disk-backed scorers
//! - `cache`: breadth-first preload of the top of the graph

mod cache;
mod features;
mod format;
mod reader;
mod writer;

#[cfg(test)]
mod cache_tests;

pub use cache::{CachedGraphView, GraphCache, DEFAULT_CACHE_DEPTH};
pub use features::Feature;
pub use format::{FeatureId, CURRENT_VERSION, MAGIC};
pub use reader::{NeighborIter, OnDiskGraph, OnDiskView};
pub use writer::{write_graph, write_graph_versioned};
