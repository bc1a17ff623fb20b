//! Fused ADC: transposed neighbor-code blocks for bulk scoring.
//!
//! The on-disk format can store, next to each node's neighbor list, the PQ
//! codes of up to 32 neighbors transposed into `M` rows of 32 bytes (one
//! row per subspace, one lane per neighbor). Scoring a whole neighbor list
//! then walks the rows once, gathering from the per-query partial table,
//! which is the layout SIMD shuffle kernels want. The arithmetic here is
//! the portable definition of that kernel.

use super::scorer::AdcPartials;
use super::{PqCodeStore, ProductQuantizer};
use crate::error::{Error, Result};
use crate::similarity::Similarity;
use crate::NodeId;

/// Neighbor lanes per fused block.
pub const FUSED_LANES: usize = 32;

/// Packs the codes of `neighbors` into `M` transposed 32-byte rows.
///
/// Row `s`, lane `j` holds subspace `s`'s code of `neighbors[j]`. Unused
/// lanes stay zero and are masked by the neighbor count at scoring time.
///
/// # Errors
///
/// Returns `InvalidArgument` when more than [`FUSED_LANES`] neighbors are
/// given and `OutOfRange` when a neighbor has no stored code.
pub fn pack_neighbor_codes(
    pq: &ProductQuantizer,
    codes: &PqCodeStore,
    neighbors: &[NodeId],
) -> Result<Vec<u8>> {
    if neighbors.len() > FUSED_LANES {
        return Err(Error::InvalidArgument(format!(
            "{} neighbors exceed the fused block width {FUSED_LANES}",
            neighbors.len()
        )));
    }
    let m = pq.subspaces();
    let mut packed = vec![0u8; m * FUSED_LANES];
    for (lane, &neighbor) in neighbors.iter().enumerate() {
        let code = codes.get(neighbor).ok_or(Error::OutOfRange {
            ordinal: neighbor,
            upper_bound: u32::try_from(codes.len()).unwrap_or(u32::MAX),
        })?;
        for (s, &byte) in code.iter().enumerate() {
            packed[s * FUSED_LANES + lane] = byte;
        }
    }
    Ok(packed)
}

/// Per-query lookup table scoring fused blocks.
pub struct AdcTable {
    partials: AdcPartials,
}

impl AdcTable {
    /// Builds the table for `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub fn new(pq: &ProductQuantizer, similarity: Similarity, query: &[f32]) -> Result<Self> {
        let mut partials = AdcPartials::build(pq, similarity, query)?;
        if similarity == Similarity::Dot {
            if let Some(g) = pq.global_centroid() {
                partials.bias = crate::simd::dot_product(query, g);
            }
        }
        Ok(Self { partials })
    }

    /// Scores the first `count` lanes of a packed block into `out`.
    ///
    /// # Panics
    ///
    /// Panics if `packed` is not `M * 32` bytes, or `out` or `count`
    /// disagree with each other.
    pub fn score_block(&self, packed: &[u8], count: usize, out: &mut [f32]) {
        let m = self.partials.m;
        let k = self.partials.k;
        assert_eq!(packed.len(), m * FUSED_LANES, "malformed fused block");
        assert!(count <= FUSED_LANES && out.len() >= count);

        let mut main = [0.0f32; FUSED_LANES];
        let mut mag = [0.0f32; FUSED_LANES];
        for s in 0..m {
            let row = &packed[s * FUSED_LANES..(s + 1) * FUSED_LANES];
            for lane in 0..count {
                let idx = s * k + row[lane] as usize;
                main[lane] += self.partials.table[idx];
                if let Some(mags) = &self.partials.mag {
                    mag[lane] += mags[idx];
                }
            }
        }
        for lane in 0..count {
            out[lane] = self.partials.finish(main[lane], mag[lane]);
        }
    }

    /// Scores a single standalone code buffer.
    #[must_use]
    pub fn score_code(&self, code: &[u8]) -> f32 {
        self.partials.score_code(code)
    }
}
