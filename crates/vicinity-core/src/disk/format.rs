//! File identity, feature ids and the common header codec.

use crate::error::{Error, Result};

/// File magic, first four bytes of every index file.
pub const MAGIC: [u8; 4] = *b"VCNX";

/// Newest format version this build writes and reads.
pub const CURRENT_VERSION: u32 = 3;

/// Oldest version still readable. Versions 1 and 2 predate hierarchy and
/// load as single-layer graphs.
pub const MIN_VERSION: u32 = 1;

/// Sentinel for "no entry node" in an empty index.
pub(crate) const NO_ENTRY: u32 = u32::MAX;

/// Sentinel padding for unused neighbor slots.
pub(crate) const NO_NEIGHBOR: u32 = u32::MAX;

/// Pluggable per-node payloads stored alongside the graph.
///
/// Presence is a bit in the header; payload blobs are inline in the
/// layer-0 records or separated at the end of the file. Unknown bits
/// refuse to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FeatureId {
    /// Full f32 vectors inline: exact reranking straight from the record.
    InlineVectors = 0,
    /// Transposed per-neighbor PQ codes next to each neighbor list, for
    /// bulk ADC scoring during expansion.
    FusedAdc = 1,
    /// NVQ-compressed vectors inline: compact reranker.
    NvqVectors = 2,
    /// Full f32 vectors in a contiguous end-of-file region, for IO
    /// locality when records are cold.
    SeparatedVectors = 3,
    /// NVQ vectors, separated.
    SeparatedNvq = 4,
}

impl FeatureId {
    /// All features, ascending id order (the on-disk order).
    pub const ALL: [FeatureId; 5] = [
        FeatureId::InlineVectors,
        FeatureId::FusedAdc,
        FeatureId::NvqVectors,
        FeatureId::SeparatedVectors,
        FeatureId::SeparatedNvq,
    ];

    /// The header bitmask bit for this feature.
    #[must_use]
    pub fn bit(self) -> u32 {
        1u32 << (self as u8)
    }

    /// Mask of every known feature bit.
    #[must_use]
    pub fn known_bits() -> u32 {
        Self::ALL.iter().fold(0, |acc, f| acc | f.bit())
    }
}

/// Per-layer shape recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayerInfo {
    /// Number of member nodes.
    pub size: u32,
    /// Neighbor slots per record.
    pub degree: u32,
}

/// Everything before the id bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommonHeader {
    pub dimension: u32,
    pub entry_node: u32,
    pub layers: Vec<LayerInfo>,
    pub id_upper_bound: u32,
    pub feature_bits: u32,
}

impl CommonHeader {
    /// Encoded length including magic and version.
    pub(crate) fn encoded_len(&self) -> usize {
        4 + 4 + 4 + 4 + 4 + self.layers.len() * 8 + 4 + 4
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>, version: u32) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&self.dimension.to_le_bytes());
        out.extend_from_slice(&self.entry_node.to_le_bytes());
        out.extend_from_slice(
            &u32::try_from(self.layers.len())
                .expect("layer count fits in u32")
                .to_le_bytes(),
        );
        for layer in &self.layers {
            out.extend_from_slice(&layer.size.to_le_bytes());
            out.extend_from_slice(&layer.degree.to_le_bytes());
        }
        out.extend_from_slice(&self.id_upper_bound.to_le_bytes());
        out.extend_from_slice(&self.feature_bits.to_le_bytes());
    }

    /// Parses magic, version and header fields.
    ///
    /// # Errors
    ///
    /// `IncompatibleVersion` for foreign or future files and unknown
    /// feature bits; `Corrupt` for truncation or internal inconsistency.
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<(Self, u32)> {
        let magic = cursor.bytes(4)?;
        if magic != MAGIC {
            return Err(Error::IncompatibleVersion(format!(
                "bad magic {magic:02x?}, not a vicinity index"
            )));
        }
        let version = cursor.u32()?;
        if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(Error::IncompatibleVersion(format!(
                "version {version} outside supported range {MIN_VERSION}..={CURRENT_VERSION}"
            )));
        }

        let dimension = cursor.u32()?;
        let entry_node = cursor.u32()?;
        let layer_count = cursor.u32()?;
        if layer_count == 0 || layer_count > 64 {
            return Err(Error::Corrupt(format!(
                "implausible layer count {layer_count}"
            )));
        }
        if version < 3 && layer_count != 1 {
            return Err(Error::Corrupt(format!(
                "version {version} predates hierarchy but has {layer_count} layers"
            )));
        }
        let mut layers = Vec::with_capacity(layer_count as usize);
        for _ in 0..layer_count {
            let size = cursor.u32()?;
            let degree = cursor.u32()?;
            if degree == 0 {
                return Err(Error::Corrupt("zero-degree layer".into()));
            }
            layers.push(LayerInfo { size, degree });
        }
        let id_upper_bound = cursor.u32()?;
        let feature_bits = cursor.u32()?;
        if feature_bits & !FeatureId::known_bits() != 0 {
            return Err(Error::IncompatibleVersion(format!(
                "unknown feature bits {:#x}",
                feature_bits & !FeatureId::known_bits()
            )));
        }
        if layers[0].size > id_upper_bound {
            return Err(Error::Corrupt(format!(
                "layer 0 size {} exceeds id upper bound {id_upper_bound}",
                layers[0].size
            )));
        }

        Ok((
            Self {
                dimension,
                entry_node,
                layers,
                id_upper_bound,
                feature_bits,
            },
            version,
        ))
    }
}

/// Bounds-checked little-endian reader over a byte slice.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn buf(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::Corrupt("offset overflow".into()))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::Corrupt("truncated index file".into()))?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    pub(crate) fn f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let bytes = self.bytes(count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
            .collect())
    }
}
