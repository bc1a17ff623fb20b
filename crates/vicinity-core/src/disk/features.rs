//! Writer-side feature producers and reader-side feature metadata.

use std::sync::Arc;

use super::format::{Cursor, FeatureId};
use crate::error::{Error, Result};
use crate::nvq::NvqQuantizer;
use crate::pq::{pack_neighbor_codes, PqCodeStore, ProductQuantizer, FUSED_LANES};
use crate::vectors::VectorSource;
use crate::NodeId;

/// A feature to be written: its id plus the per-node state producer the
/// writer invokes during the streaming pass.
///
/// Vector-bearing features read from the *original* (pre-renumbering)
/// ordinals; the writer handles the old-to-new translation.
pub enum Feature<'a> {
    /// Full vectors inline in each layer-0 record.
    InlineVectors {
        /// Vectors by original ordinal.
        source: &'a dyn VectorSource,
    },
    /// Transposed PQ codes of each node's first 32 neighbors.
    FusedAdc {
        /// The trained quantizer; its codebook lands in the header.
        pq: &'a ProductQuantizer,
        /// Codes by original ordinal.
        codes: &'a PqCodeStore,
    },
    /// NVQ-compressed vectors inline.
    NvqVectors {
        /// The trained codec; its parameters land in the header.
        nvq: &'a NvqQuantizer,
        /// Vectors by original ordinal.
        source: &'a dyn VectorSource,
    },
    /// Full vectors in a contiguous region at the end of the file.
    SeparatedVectors {
        /// Vectors by original ordinal.
        source: &'a dyn VectorSource,
    },
    /// NVQ vectors, separated.
    SeparatedNvq {
        /// The trained codec.
        nvq: &'a NvqQuantizer,
        /// Vectors by original ordinal.
        source: &'a dyn VectorSource,
    },
}

impl Feature<'_> {
    /// The feature's id.
    #[must_use]
    pub fn id(&self) -> FeatureId {
        match self {
            Feature::InlineVectors { .. } => FeatureId::InlineVectors,
            Feature::FusedAdc { .. } => FeatureId::FusedAdc,
            Feature::NvqVectors { .. } => FeatureId::NvqVectors,
            Feature::SeparatedVectors { .. } => FeatureId::SeparatedVectors,
            Feature::SeparatedNvq { .. } => FeatureId::SeparatedNvq,
        }
    }

    pub(crate) fn is_separated(&self) -> bool {
        matches!(
            self,
            Feature::SeparatedVectors { .. } | Feature::SeparatedNvq { .. }
        )
    }

    /// Validates the feature against the graph dimension.
    pub(crate) fn validate(&self, dimension: usize) -> Result<()> {
        let feature_dim = match self {
            Feature::InlineVectors { source } | Feature::SeparatedVectors { source } => {
                source.dimension()
            }
            Feature::FusedAdc { pq, .. } => pq.dimension(),
            Feature::NvqVectors { nvq, source } | Feature::SeparatedNvq { nvq, source } => {
                if nvq.dimension() != source.dimension() {
                    return Err(Error::InvalidArgument(format!(
                        "NVQ dimension {} does not match its source {}",
                        nvq.dimension(),
                        source.dimension()
                    )));
                }
                nvq.dimension()
            }
        };
        if feature_dim != dimension {
            return Err(Error::InvalidArgument(format!(
                "feature {:?} dimension {feature_dim} does not match graph dimension {dimension}",
                self.id()
            )));
        }
        Ok(())
    }

    /// Bytes this feature adds to every layer-0 record (zero if separated).
    pub(crate) fn inline_record_len(&self) -> usize {
        match self {
            Feature::InlineVectors { source } => source.dimension() * 4,
            Feature::FusedAdc { pq, .. } => pq.subspaces() * FUSED_LANES,
            Feature::NvqVectors { nvq, .. } => nvq.encoded_len(),
            Feature::SeparatedVectors { .. } | Feature::SeparatedNvq { .. } => 0,
        }
    }

    /// Bytes per live node in the separated region (zero if inline).
    pub(crate) fn separated_record_len(&self) -> usize {
        match self {
            Feature::SeparatedVectors { source } => source.dimension() * 4,
            Feature::SeparatedNvq { nvq, .. } => nvq.encoded_len(),
            _ => 0,
        }
    }

    /// Header payload length; separated features add an 8-byte offset.
    pub(crate) fn header_len(&self) -> usize {
        match self {
            Feature::InlineVectors { .. } => 4,
            Feature::FusedAdc { pq, .. } => pq.header_len(),
            Feature::NvqVectors { nvq, .. } => nvq.header_len(),
            Feature::SeparatedVectors { .. } => 4 + 8,
            Feature::SeparatedNvq { nvq, .. } => nvq.header_len() + 8,
        }
    }

    /// Serializes the header payload; `offset` is the separated region
    /// start for separated features.
    pub(crate) fn write_header(&self, out: &mut Vec<u8>, offset: u64) {
        match self {
            Feature::InlineVectors { source } => {
                out.extend_from_slice(
                    &u32::try_from(source.dimension())
                        .expect("dimension fits in u32")
                        .to_le_bytes(),
                );
            }
            Feature::FusedAdc { pq, .. } => out.extend_from_slice(&pq.to_bytes()),
            Feature::NvqVectors { nvq, .. } => out.extend_from_slice(&nvq.to_bytes()),
            Feature::SeparatedVectors { source } => {
                out.extend_from_slice(
                    &u32::try_from(source.dimension())
                        .expect("dimension fits in u32")
                        .to_le_bytes(),
                );
                out.extend_from_slice(&offset.to_le_bytes());
            }
            Feature::SeparatedNvq { nvq, .. } => {
                out.extend_from_slice(&nvq.to_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }
    }

    /// Appends this feature's inline blob for `old_ord` to `out`.
    ///
    /// `neighbors_old` is the node's kept neighbor list in record order,
    /// original ordinals.
    pub(crate) fn write_inline_record(
        &self,
        old_ord: NodeId,
        neighbors_old: &[NodeId],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match self {
            Feature::InlineVectors { source } => {
                let v = source.get(old_ord)?;
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
            Feature::FusedAdc { pq, codes } => {
                let lanes = &neighbors_old[..neighbors_old.len().min(FUSED_LANES)];
                out.extend_from_slice(&pack_neighbor_codes(pq, codes, lanes)?);
            }
            Feature::NvqVectors { nvq, source } => {
                let v = source.get(old_ord)?;
                out.extend_from_slice(&nvq.encode(&v)?);
            }
            Feature::SeparatedVectors { .. } | Feature::SeparatedNvq { .. } => {}
        }
        Ok(())
    }

    /// Appends this feature's separated blob for `old_ord` to `out`.
    pub(crate) fn write_separated_record(&self, old_ord: NodeId, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Feature::SeparatedVectors { source } => {
                let v = source.get(old_ord)?;
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
            Feature::SeparatedNvq { nvq, source } => {
                let v = source.get(old_ord)?;
                out.extend_from_slice(&nvq.encode(&v)?);
            }
            _ => {}
        }
        Ok(())
    }
}

/// A parsed feature header.
#[derive(Debug, Clone)]
pub(crate) enum FeatureMeta {
    InlineVectors {
        dimension: usize,
    },
    FusedAdc {
        pq: Arc<ProductQuantizer>,
    },
    NvqVectors {
        nvq: Arc<NvqQuantizer>,
    },
    SeparatedVectors {
        dimension: usize,
        offset: u64,
    },
    SeparatedNvq {
        nvq: Arc<NvqQuantizer>,
        offset: u64,
    },
}

impl FeatureMeta {
    /// Parses one feature header at the cursor.
    pub(crate) fn parse(id: FeatureId, cursor: &mut Cursor<'_>) -> Result<Self> {
        match id {
            FeatureId::InlineVectors => Ok(Self::InlineVectors {
                dimension: cursor.u32()? as usize,
            }),
            FeatureId::FusedAdc => {
                let pq = parse_pq(cursor)?;
                Ok(Self::FusedAdc { pq: Arc::new(pq) })
            }
            FeatureId::NvqVectors => {
                let nvq = parse_nvq(cursor)?;
                Ok(Self::NvqVectors { nvq: Arc::new(nvq) })
            }
            FeatureId::SeparatedVectors => {
                let dimension = cursor.u32()? as usize;
                let offset = parse_u64(cursor)?;
                Ok(Self::SeparatedVectors { dimension, offset })
            }
            FeatureId::SeparatedNvq => {
                let nvq = parse_nvq(cursor)?;
                let offset = parse_u64(cursor)?;
                Ok(Self::SeparatedNvq {
                    nvq: Arc::new(nvq),
                    offset,
                })
            }
        }
    }

    /// Bytes this feature occupies inline in each layer-0 record.
    pub(crate) fn inline_record_len(&self) -> usize {
        match self {
            Self::InlineVectors { dimension } => dimension * 4,
            Self::FusedAdc { pq } => pq.subspaces() * FUSED_LANES,
            Self::NvqVectors { nvq } => nvq.encoded_len(),
            Self::SeparatedVectors { .. } | Self::SeparatedNvq { .. } => 0,
        }
    }

    /// Bytes per live node in the separated region.
    pub(crate) fn separated_record_len(&self) -> usize {
        match self {
            Self::SeparatedVectors { dimension, .. } => dimension * 4,
            Self::SeparatedNvq { nvq, .. } => nvq.encoded_len(),
            _ => 0,
        }
    }

    /// Separated region offset, when this feature has one.
    pub(crate) fn separated_offset(&self) -> Option<u64> {
        match self {
            Self::SeparatedVectors { offset, .. } | Self::SeparatedNvq { offset, .. } => {
                Some(*offset)
            }
            _ => None,
        }
    }

    /// Re-serializes the header payload; inverse of [`FeatureMeta::parse`].
    pub(crate) fn write_header(&self, out: &mut Vec<u8>) {
        match self {
            Self::InlineVectors { dimension } => {
                out.extend_from_slice(
                    &u32::try_from(*dimension)
                        .expect("dimension fits in u32")
                        .to_le_bytes(),
                );
            }
            Self::FusedAdc { pq } => out.extend_from_slice(&pq.to_bytes()),
            Self::NvqVectors { nvq } => out.extend_from_slice(&nvq.to_bytes()),
            Self::SeparatedVectors { dimension, offset } => {
                out.extend_from_slice(
                    &u32::try_from(*dimension)
                        .expect("dimension fits in u32")
                        .to_le_bytes(),
                );
                out.extend_from_slice(&offset.to_le_bytes());
            }
            Self::SeparatedNvq { nvq, offset } => {
                out.extend_from_slice(&nvq.to_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }
    }
}

fn parse_u64(cursor: &mut Cursor<'_>) -> Result<u64> {
    let lo = cursor.u32()?;
    let hi = cursor.u32()?;
    Ok(u64::from(lo) | (u64::from(hi) << 32))
}

/// Reads a PQ codebook header, delegating length discovery to the codec.
fn parse_pq(cursor: &mut Cursor<'_>) -> Result<ProductQuantizer> {
    // Peek the shape to know the full length, then hand the exact slice
    // to the codec parser
    let start = cursor.position();
    let dimension = cursor.u32()? as usize;
    let m = cursor.u32()? as usize;
    let k = cursor.u32()? as usize;
    let has_global = cursor.bytes(1)?[0];
    if m == 0 || m > dimension || k < 2 || k > 256 {
        return Err(Error::Corrupt(format!(
            "implausible quantizer shape: d={dimension} m={m} k={k}"
        )));
    }
    let global_len = if has_global != 0 { dimension * 4 } else { 0 };
    let codebook_len = k * dimension * 4;
    cursor.bytes(global_len + codebook_len)?;
    let end = cursor.position();
    ProductQuantizer::from_bytes(&cursor.buf()[start..end])
}

/// Reads an NVQ header, delegating length discovery to the codec.
fn parse_nvq(cursor: &mut Cursor<'_>) -> Result<NvqQuantizer> {
    let start = cursor.position();
    let dimension = cursor.u32()? as usize;
    let subvector_count = cursor.u32()? as usize;
    if subvector_count == 0 || subvector_count > dimension {
        return Err(Error::Corrupt(format!(
            "implausible NVQ shape: d={dimension} subvectors={subvector_count}"
        )));
    }
    let sizes = crate::pq::split_dimension(dimension, subvector_count)
        .map_err(|e| Error::Corrupt(e.to_string()))?;
    for size in sizes {
        cursor.bytes(1 + size * 8)?;
    }
    let end = cursor.position();
    NvqQuantizer::from_bytes(&cursor.buf()[start..end])
}
