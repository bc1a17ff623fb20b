//! Single-pass streaming index writer.
//!
//! The whole layout is computed up front (every section length is known
//! from the header), so the file is written strictly front to back with no
//! backpatching. An optional old-to-new renumbering map eliminates ordinal
//! holes; nodes absent from the map are not written.

use rustc_hash::FxHashMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use super::features::Feature;
use super::format::{CommonHeader, LayerInfo, CURRENT_VERSION, MIN_VERSION, NO_ENTRY, NO_NEIGHBOR};
use crate::error::{Error, Result};
use crate::graph::{GraphView, OnHeapGraph};
use crate::vectors::VectorSource;
use crate::NodeId;

/// Writes `graph` at the current format version.
///
/// See [`write_graph_versioned`].
///
/// # Errors
///
/// Same failure modes as [`write_graph_versioned`].
pub fn write_graph<P: AsRef<Path>>(
    graph: &OnHeapGraph,
    source: &dyn VectorSource,
    path: P,
    features: &[Feature<'_>],
    renumber: Option<&FxHashMap<NodeId, NodeId>>,
) -> Result<()> {
    write_graph_versioned(graph, source, path, features, renumber, CURRENT_VERSION)
}

/// Writes `graph` to `path` at an explicit format `version`.
///
/// `source` supplies the dimension and is not otherwise read; each feature
/// carries its own per-node state producer, keyed by *original* ordinals.
/// Tombstoned nodes are skipped. With a renumbering map, neighbors whose
/// target is dropped are dropped from the written lists too.
///
/// # Errors
///
/// `InvalidArgument` for unsupported versions, hierarchy below version 3,
/// duplicate features, dimension mismatches or a non-injective renumbering
/// map; `Io` on file errors.
pub fn write_graph_versioned<P: AsRef<Path>>(
    graph: &OnHeapGraph,
    source: &dyn VectorSource,
    path: P,
    features: &[Feature<'_>],
    renumber: Option<&FxHashMap<NodeId, NodeId>>,
    version: u32,
) -> Result<()> {
    if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
        return Err(Error::InvalidArgument(format!(
            "cannot write version {version}; supported range is {MIN_VERSION}..={CURRENT_VERSION}"
        )));
    }
    let layer_count = graph.layer_count();
    if version < 3 && layer_count > 1 {
        return Err(Error::InvalidArgument(format!(
            "version {version} predates hierarchy; graph has {layer_count} layers"
        )));
    }

    let dimension = source.dimension();
    let mut ordered: Vec<&Feature<'_>> = features.iter().collect();
    ordered.sort_by_key(|f| f.id());
    for pair in ordered.windows(2) {
        if pair[0].id() == pair[1].id() {
            return Err(Error::InvalidArgument(format!(
                "duplicate feature {:?}",
                pair[0].id()
            )));
        }
    }
    for feature in &ordered {
        feature.validate(dimension)?;
    }

    // Live nodes and the old-to-new mapping
    let mut live_old: Vec<NodeId> = graph
        .ordinals(0)
        .into_iter()
        .filter(|&ord| !graph.is_deleted(ord))
        .collect();
    live_old.sort_unstable();

    let map_old = |old: NodeId| -> Option<NodeId> {
        match renumber {
            Some(map) => map.get(&old).copied(),
            None => Some(old),
        }
    };

    // new ordinal -> old ordinal, with injectivity check
    let mut new_to_old: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    for &old in &live_old {
        if let Some(new) = map_old(old) {
            if new_to_old.insert(new, old).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "renumbering map sends two ordinals to {new}"
                )));
            }
        }
    }
    let new_ub = new_to_old.keys().max().map_or(0, |&n| n + 1);

    let entry_node = graph
        .entry()
        .and_then(|(old, _)| map_old(old))
        .or_else(|| new_to_old.keys().min().copied())
        .unwrap_or(NO_ENTRY);

    // Per-layer membership in new-ordinal order
    let mut layer_members: Vec<Vec<(NodeId, NodeId)>> = Vec::with_capacity(layer_count);
    for level in 0..layer_count {
        let mut members: Vec<(NodeId, NodeId)> = graph
            .ordinals(level)
            .into_iter()
            .filter(|&old| !graph.is_deleted(old))
            .filter_map(|old| map_old(old).map(|new| (new, old)))
            .collect();
        members.sort_unstable();
        layer_members.push(members);
    }

    let layers: Vec<LayerInfo> = layer_members
        .iter()
        .enumerate()
        .map(|(level, members)| LayerInfo {
            size: u32::try_from(members.len()).expect("layer size fits in u32"),
            degree: u32::try_from(graph.max_degree_at(level)).expect("degree fits in u32"),
        })
        .collect();

    let feature_bits = ordered.iter().fold(0u32, |acc, f| acc | f.id().bit());
    let header = CommonHeader {
        dimension: u32::try_from(dimension).expect("dimension fits in u32"),
        entry_node,
        layers: layers.clone(),
        id_upper_bound: new_ub,
        feature_bits,
    };

    // Layout arithmetic; everything downstream depends on these lengths
    let inline_len: usize = ordered.iter().map(|f| f.inline_record_len()).sum();
    let record_len0 = 4 + inline_len + 4 + 4 * layers[0].degree as usize;
    let bitmap_len = (new_ub as usize).div_ceil(8);
    let header_total =
        header.encoded_len() + bitmap_len + ordered.iter().map(|f| f.header_len()).sum::<usize>();

    let mut section_end = header_total + new_ub as usize * record_len0;
    for (level, info) in layers.iter().enumerate().skip(1) {
        section_end += layer_members[level].len() * (8 + 4 * info.degree as usize);
    }
    let live_count = layer_members[0].len();
    let mut separated_offsets: FxHashMap<u8, u64> = FxHashMap::default();
    for feature in &ordered {
        if feature.is_separated() {
            separated_offsets.insert(
                feature.id() as u8,
                u64::try_from(section_end).expect("offset fits in u64"),
            );
            section_end += live_count * feature.separated_record_len();
        }
    }
    let total_len = section_end;

    // Stream the file front to back
    let file = std::fs::File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    let mut written = 0usize;

    let mut head = Vec::with_capacity(header_total);
    header.write_to(&mut head, version);

    let mut bitmap = vec![0u8; bitmap_len];
    for &new in new_to_old.keys() {
        bitmap[new as usize / 8] |= 1 << (new as usize % 8);
    }
    head.extend_from_slice(&bitmap);

    for feature in &ordered {
        let offset = separated_offsets
            .get(&(feature.id() as u8))
            .copied()
            .unwrap_or(0);
        feature.write_header(&mut head, offset);
    }
    debug_assert_eq!(head.len(), header_total);
    writer.write_all(&head)?;
    written += head.len();

    // Layer 0 records, holes zeroed
    let mut record = Vec::with_capacity(record_len0);
    for new in 0..new_ub {
        record.clear();
        if let Some(&old) = new_to_old.get(&new) {
            let mut neighbors_old = kept_neighbors(graph, 0, old, &map_old);
            // Slots and fused lanes must describe the same neighbor list
            neighbors_old.truncate(layers[0].degree as usize);
            record.extend_from_slice(&new.to_le_bytes());
            for feature in &ordered {
                feature.write_inline_record(old, &neighbors_old, &mut record)?;
            }
            write_neighbor_slots(&mut record, &neighbors_old, &map_old, layers[0].degree as usize);
        } else {
            record.resize(record_len0, 0);
        }
        debug_assert_eq!(record.len(), record_len0);
        writer.write_all(&record)?;
        written += record.len();
    }

    // Upper layers
    for (level, info) in layers.iter().enumerate().skip(1) {
        for &(new, old) in &layer_members[level] {
            record.clear();
            record.extend_from_slice(&new.to_le_bytes());
            let neighbors_old = kept_neighbors(graph, level, old, &map_old);
            write_neighbor_slots(&mut record, &neighbors_old, &map_old, info.degree as usize);
            writer.write_all(&record)?;
            written += record.len();
        }
    }

    // Separated feature regions
    for feature in &ordered {
        if !feature.is_separated() {
            continue;
        }
        for &(_, old) in &layer_members[0] {
            record.clear();
            feature.write_separated_record(old, &mut record)?;
            writer.write_all(&record)?;
            written += record.len();
        }
    }

    debug_assert_eq!(written, total_len);
    writer.flush()?;
    writer
        .into_inner()
        .map_err(std::io::IntoInnerError::into_error)?
        .sync_all()?;

    info!(
        path = %path.as_ref().display(),
        bytes = total_len,
        nodes = live_count,
        layers = layer_count,
        version,
        "wrote graph index"
    );
    Ok(())
}

/// A node's neighbor list filtered to survivors, original ordinals, record
/// order preserved.
fn kept_neighbors(
    graph: &OnHeapGraph,
    level: usize,
    old: NodeId,
    map_old: &impl Fn(NodeId) -> Option<NodeId>,
) -> Vec<NodeId> {
    graph
        .neighbors(level, old)
        .map(|list| {
            list.nodes()
                .iter()
                .copied()
                .filter(|&n| !graph.is_deleted(n) && map_old(n).is_some())
                .collect()
        })
        .unwrap_or_default()
}

/// Appends `neighbor_count` then exactly `degree` id slots, -1 padded.
fn write_neighbor_slots(
    record: &mut Vec<u8>,
    neighbors_old: &[NodeId],
    map_old: &impl Fn(NodeId) -> Option<NodeId>,
    degree: usize,
) {
    let kept = &neighbors_old[..neighbors_old.len().min(degree)];
    record.extend_from_slice(
        &u32::try_from(kept.len())
            .expect("degree fits in u32")
            .to_le_bytes(),
    );
    let mut slots = 0;
    for &old in kept {
        let new = map_old(old).expect("kept neighbors are mapped");
        record.extend_from_slice(&new.to_le_bytes());
        slots += 1;
    }
    while slots < degree {
        record.extend_from_slice(&NO_NEIGHBOR.to_le_bytes());
        slots += 1;
    }
}
