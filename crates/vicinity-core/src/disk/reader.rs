//! Memory-mapped index reader, views and disk-backed scorers.
//!
//! One shared read-only mapping serves every thread; a [`OnDiskView`] is a
//! cheap per-thread cursor borrowing the reader and must not outlive it.
//! Loading validates the whole layout up front and never decompresses
//! anything; record accesses are O(1) seeks into the mapping. Dropping the
//! reader unmaps the file on every exit path.

use memmap2::Mmap;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::features::FeatureMeta;
use super::format::{CommonHeader, Cursor, FeatureId, NO_ENTRY, NO_NEIGHBOR};
use crate::error::{Error, Result};
use crate::graph::GraphView;
use crate::bitset::FixedBitSet;
use crate::pq::{AdcTable, FUSED_LANES};
use crate::score::ScoreFn;
use crate::similarity::Similarity;
use crate::NodeId;

/// One upper layer's record section.
struct UpperLayer {
    offset: usize,
    record_len: usize,
    degree: usize,
    /// Member ordinal to record index within the section.
    index: FxHashMap<NodeId, usize>,
}

pub(crate) struct DiskInner {
    mmap: Mmap,
    version: u32,
    header: CommonHeader,
    live: FixedBitSet,
    live_count: usize,
    /// Dense rank among live ordinals, for separated-region addressing.
    live_rank: Vec<u32>,
    /// Parsed feature headers, ascending id, parallel to `feature_ids`.
    features: Vec<FeatureMeta>,
    feature_ids: Vec<FeatureId>,
    /// Byte offset of each inline feature blob within a layer-0 record.
    inline_offsets: Vec<usize>,
    layer0_offset: usize,
    record_len0: usize,
    /// Offset of the neighbor count within a layer-0 record.
    neighbors_at: usize,
    upper: Vec<UpperLayer>,
    entry: Option<(NodeId, usize)>,
}

/// A loaded, validated, memory-mapped index.
pub struct OnDiskGraph {
    inner: Arc<DiskInner>,
}

impl std::fmt::Debug for OnDiskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDiskGraph").finish_non_exhaustive()
    }
}

impl OnDiskGraph {
    /// Loads and validates the index at `path`.
    ///
    /// # Errors
    ///
    /// `Io` on open/map failures, `IncompatibleVersion` for foreign magic,
    /// future versions or unknown feature bits, `Corrupt` for any header
    /// or layout inconsistency.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        // SAFETY: the file is opened read-only and mapped shared; the
        // format is written once and never mutated afterwards.
        let mmap = unsafe { Mmap::map(&file)? };
        #[cfg(unix)]
        if let Err(e) = mmap.advise(memmap2::Advice::Random) {
            debug!(?e, "madvise(RANDOM) not applied");
        }

        let inner = parse_and_validate(mmap)?;
        info!(
            path = %path.as_ref().display(),
            nodes = inner.live_count,
            dimension = inner.header.dimension,
            layers = inner.header.layers.len(),
            version = inner.version,
            "loaded graph index"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// A scoped read view. Views borrow the reader and share its mapping.
    #[must_use]
    pub fn view(&self) -> OnDiskView<'_> {
        OnDiskView {
            inner: &self.inner,
        }
    }

    /// Vector dimension recorded in the header.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.header.dimension as usize
    }

    /// Number of live nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.live_count
    }

    /// Exclusive ordinal upper bound (holes included).
    #[must_use]
    pub fn id_upper_bound(&self) -> u32 {
        self.inner.header.id_upper_bound
    }

    /// Format version this file was written at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Features present, ascending id.
    #[must_use]
    pub fn feature_ids(&self) -> &[FeatureId] {
        &self.inner.feature_ids
    }

    /// Re-writes the loaded index to `path` at its own version and feature
    /// set. The output is byte-identical to the input file.
    ///
    /// # Errors
    ///
    /// `Io` on file errors.
    pub fn rewrite<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;

        let inner = &*self.inner;
        let mut head = Vec::new();
        inner.header.write_to(&mut head, inner.version);

        let bitmap_len = (inner.header.id_upper_bound as usize).div_ceil(8);
        let mut bitmap = vec![0u8; bitmap_len];
        for ord in 0..inner.header.id_upper_bound {
            if inner.live.get(ord) {
                bitmap[ord as usize / 8] |= 1 << (ord as usize % 8);
            }
        }
        head.extend_from_slice(&bitmap);
        for meta in &inner.features {
            meta.write_header(&mut head);
        }
        debug_assert_eq!(head.len(), inner.layer0_offset);

        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(&head)?;
        // Records and separated regions are contiguous after the headers
        writer.write_all(&inner.mmap[inner.layer0_offset..])?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    }
}

fn parse_and_validate(mmap: Mmap) -> Result<DiskInner> {
    let buf: &[u8] = &mmap;
    let mut cursor = Cursor::new(buf);
    let (header, version) = CommonHeader::parse(&mut cursor)?;

    let ub = header.id_upper_bound as usize;
    let bitmap = cursor.bytes(ub.div_ceil(8))?;
    let mut live = FixedBitSet::new(ub);
    let mut live_rank = vec![u32::MAX; ub];
    let mut live_count = 0usize;
    for ord in 0..ub {
        if bitmap[ord / 8] & (1 << (ord % 8)) != 0 {
            live.set(u32::try_from(ord).expect("ordinal fits in u32"));
            live_rank[ord] = u32::try_from(live_count).expect("rank fits in u32");
            live_count += 1;
        }
    }
    if live_count != header.layers[0].size as usize {
        return Err(Error::Corrupt(format!(
            "id bitmap has {live_count} live nodes but layer 0 claims {}",
            header.layers[0].size
        )));
    }

    let mut features = Vec::new();
    let mut feature_ids = Vec::new();
    for id in FeatureId::ALL {
        if header.feature_bits & id.bit() != 0 {
            features.push(FeatureMeta::parse(id, &mut cursor)?);
            feature_ids.push(id);
        }
    }

    let mut inline_offsets = Vec::with_capacity(features.len());
    let mut inline_at = 4usize;
    for meta in &features {
        inline_offsets.push(inline_at);
        inline_at += meta.inline_record_len();
    }
    let degree0 = header.layers[0].degree as usize;
    let neighbors_at = inline_at;
    let record_len0 = inline_at + 4 + 4 * degree0;

    let layer0_offset = cursor.position();
    let mut section = layer0_offset + ub * record_len0;

    // Upper layers: record ids index their sections
    let mut upper = Vec::new();
    for info in header.layers.iter().skip(1) {
        let degree = info.degree as usize;
        let record_len = 8 + 4 * degree;
        let mut index = FxHashMap::default();
        for i in 0..info.size as usize {
            let mut record = Cursor::at(buf, section + i * record_len);
            let id = record.u32()?;
            if id as usize >= ub || !live.get(id) {
                return Err(Error::Corrupt(format!(
                    "upper-layer member {id} is not a live node"
                )));
            }
            if index.insert(id, i).is_some() {
                return Err(Error::Corrupt(format!(
                    "node {id} appears twice in one layer"
                )));
            }
        }
        upper.push(UpperLayer {
            offset: section,
            record_len,
            degree,
            index,
        });
        section += info.size as usize * record_len;
    }

    // Separated regions follow the layers in FeatureId order
    for meta in &features {
        if let Some(offset) = meta.separated_offset() {
            if offset != u64::try_from(section).expect("offset fits in u64") {
                return Err(Error::Corrupt(format!(
                    "separated feature offset {offset} does not match layout position {section}"
                )));
            }
            section += live_count * meta.separated_record_len();
        }
    }
    if section != buf.len() {
        return Err(Error::Corrupt(format!(
            "file length {} does not match layout size {section}",
            buf.len()
        )));
    }

    // Entry must be live; its level is the highest layer holding it
    let entry = if header.entry_node == NO_ENTRY || live_count == 0 {
        None
    } else {
        let entry = header.entry_node;
        if entry as usize >= ub || !live.get(entry) {
            return Err(Error::Corrupt(format!("entry node {entry} is not live")));
        }
        let mut level = 0usize;
        for (i, layer) in upper.iter().enumerate() {
            if layer.index.contains_key(&entry) {
                level = i + 1;
            }
        }
        Some((entry, level))
    };

    Ok(DiskInner {
        mmap,
        version,
        header,
        live,
        live_count,
        live_rank,
        features,
        feature_ids,
        inline_offsets,
        layer0_offset,
        record_len0,
        neighbors_at,
        upper,
        entry,
    })
}

impl DiskInner {
    fn buf(&self) -> &[u8] {
        &self.mmap
    }

    fn check_live(&self, ord: NodeId) -> Result<()> {
        Error::check_ordinal(ord, self.header.id_upper_bound)?;
        if !self.live.get(ord) {
            return Err(Error::OutOfRange {
                ordinal: ord,
                upper_bound: self.header.id_upper_bound,
            });
        }
        Ok(())
    }

    fn record_offset(&self, ord: NodeId) -> usize {
        self.layer0_offset + ord as usize * self.record_len0
    }

    /// The inline blob of feature `id` in `ord`'s record.
    fn inline_blob(&self, ord: NodeId, id: FeatureId) -> Result<&[u8]> {
        self.check_live(ord)?;
        let slot = self
            .feature_ids
            .iter()
            .position(|&f| f == id)
            .ok_or_else(|| Error::InvalidArgument(format!("feature {id:?} not present")))?;
        let start = self.record_offset(ord) + self.inline_offsets[slot];
        let len = self.features[slot].inline_record_len();
        Ok(&self.buf()[start..start + len])
    }

    /// The separated blob of feature `slot` for `ord`.
    fn separated_blob(&self, ord: NodeId, slot: usize) -> Result<&[u8]> {
        self.check_live(ord)?;
        let meta = &self.features[slot];
        let offset = meta.separated_offset().expect("separated feature");
        let len = meta.separated_record_len();
        let rank = self.live_rank[ord as usize] as usize;
        let start = usize::try_from(offset).expect("offset fits in usize") + rank * len;
        Ok(&self.buf()[start..start + len])
    }

    /// Neighbor ids of `ord` at `level`; validated against the id space.
    fn neighbors(&self, level: usize, ord: NodeId) -> Result<&[u8]> {
        if level == 0 {
            self.check_live(ord)?;
            let start = self.record_offset(ord) + self.neighbors_at;
            return Ok(&self.buf()[start..start + 4 + 4 * self.header.layers[0].degree as usize]);
        }
        let layer = self
            .upper
            .get(level - 1)
            .ok_or_else(|| Error::InvalidArgument(format!("no layer {level}")))?;
        match layer.index.get(&ord) {
            Some(&i) => {
                let start = layer.offset + i * layer.record_len + 4;
                Ok(&self.buf()[start..start + 4 + 4 * layer.degree])
            }
            // Not a member of this layer: empty list
            None => Ok(&[]),
        }
    }

    /// Reads `ord`'s exact vector into `out`, from whichever full-vector
    /// feature is present.
    fn read_vector_into(&self, ord: NodeId, out: &mut [f32]) -> Result<bool> {
        for (slot, meta) in self.features.iter().enumerate() {
            match meta {
                FeatureMeta::InlineVectors { .. } => {
                    let blob = self.inline_blob(ord, FeatureId::InlineVectors)?;
                    decode_f32s(blob, out);
                    return Ok(true);
                }
                FeatureMeta::SeparatedVectors { .. } => {
                    let blob = self.separated_blob(ord, slot)?;
                    decode_f32s(blob, out);
                    return Ok(true);
                }
                _ => {}
            }
        }
        Ok(false)
    }

    /// Reads `ord`'s NVQ reconstruction into `out`.
    fn read_nvq_into(&self, ord: NodeId, out: &mut [f32]) -> Result<bool> {
        for (slot, meta) in self.features.iter().enumerate() {
            match meta {
                FeatureMeta::NvqVectors { nvq } => {
                    let blob = self.inline_blob(ord, FeatureId::NvqVectors)?;
                    nvq.decode_into(blob, out)?;
                    return Ok(true);
                }
                FeatureMeta::SeparatedNvq { nvq, .. } => {
                    let blob = self.separated_blob(ord, slot)?;
                    nvq.decode_into(blob, out)?;
                    return Ok(true);
                }
                _ => {}
            }
        }
        Ok(false)
    }

    fn parse_neighbor_ids<'b>(&self, section: &'b [u8]) -> Result<NeighborIter<'b>> {
        if section.is_empty() {
            return Ok(NeighborIter {
                ids: &[],
                pos: 0,
                count: 0,
            });
        }
        let count = u32::from_le_bytes(section[0..4].try_into().expect("4 bytes")) as usize;
        let degree = (section.len() - 4) / 4;
        if count > degree {
            return Err(Error::Corrupt(format!(
                "neighbor count {count} exceeds record degree {degree}"
            )));
        }
        let ids = &section[4..4 + 4 * count];
        // Validate eagerly so iteration is infallible
        for chunk in ids.chunks_exact(4) {
            let id = u32::from_le_bytes(chunk.try_into().expect("4 bytes"));
            if id == NO_NEIGHBOR || id >= self.header.id_upper_bound {
                return Err(Error::Corrupt(format!("neighbor id {id} out of range")));
            }
        }
        Ok(NeighborIter {
            ids,
            pos: 0,
            count,
        })
    }
}

fn decode_f32s(blob: &[u8], out: &mut [f32]) {
    for (slot, chunk) in out.iter_mut().zip(blob.chunks_exact(4)) {
        *slot = f32::from_le_bytes(chunk.try_into().expect("4 bytes"));
    }
}

/// Iterator over a node's on-disk neighbor ids.
pub struct NeighborIter<'a> {
    ids: &'a [u8],
    pos: usize,
    count: usize,
}

impl Iterator for NeighborIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.pos >= self.count {
            return None;
        }
        let start = self.pos * 4;
        self.pos += 1;
        Some(u32::from_le_bytes(
            self.ids[start..start + 4].try_into().expect("4 bytes"),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for NeighborIter<'_> {}

/// Per-thread read cursor over a loaded index.
#[derive(Clone, Copy)]
pub struct OnDiskView<'a> {
    inner: &'a DiskInner,
}

impl<'a> OnDiskView<'a> {
    /// Returns the exact vector of `ord`, reconstructing from NVQ when no
    /// full-vector feature is present.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for holes and unknown ordinals, `InvalidArgument` when
    /// the file stores no vectors at all.
    pub fn get_vector(&self, ord: NodeId) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; self.inner.header.dimension as usize];
        if self.inner.read_vector_into(ord, &mut out)? {
            return Ok(out);
        }
        if self.inner.read_nvq_into(ord, &mut out)? {
            return Ok(out);
        }
        Err(Error::InvalidArgument(
            "index stores no vector feature".into(),
        ))
    }

    /// Iterates `ord`'s neighbors at `level`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for unknown ordinals, `Corrupt` for malformed records.
    pub fn neighbors_iter(&self, level: usize, ord: NodeId) -> Result<NeighborIter<'a>> {
        let section = self.inner.neighbors(level, ord)?;
        self.inner.parse_neighbor_ids(section)
    }

    /// Raw access to the feature blob of `ord`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the feature is absent, `OutOfRange` for
    /// unknown ordinals.
    pub fn feature_blob(&self, ord: NodeId, id: FeatureId) -> Result<&'a [u8]> {
        match id {
            FeatureId::SeparatedVectors | FeatureId::SeparatedNvq => {
                let slot = self
                    .inner
                    .feature_ids
                    .iter()
                    .position(|&f| f == id)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("feature {id:?} not present"))
                    })?;
                self.inner.separated_blob(ord, slot)
            }
            _ => self.inner.inline_blob(ord, id),
        }
    }

    /// Builds the approximate score function this file supports for
    /// `query`: fused ADC when present, NVQ otherwise, exact vectors as a
    /// last resort.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when no scorable feature is present or the query
    /// dimension mismatches.
    pub fn approximate_scorer_for(
        &self,
        query: &[f32],
        similarity: Similarity,
    ) -> Result<Box<dyn ScoreFn + 'a>> {
        self.check_query(query)?;
        for meta in &self.inner.features {
            if let FeatureMeta::FusedAdc { pq } = meta {
                let table = AdcTable::new(pq, similarity, query)?;
                // Seeds and overflow neighbors fall back to single scoring
                let fallback = self.single_scorer(query, similarity)?;
                return Ok(Box::new(DiskFusedScorer {
                    inner: self.inner,
                    table,
                    staged: RefCell::new(FxHashMap::default()),
                    fallback,
                }));
            }
        }
        self.single_scorer(query, similarity)
    }

    /// Builds the exact reranker for `query`, preferring full vectors and
    /// falling back to NVQ reconstructions.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the file stores no vectors or the query
    /// dimension mismatches.
    pub fn reranker_for(
        &self,
        query: &[f32],
        similarity: Similarity,
    ) -> Result<Box<dyn ScoreFn + 'a>> {
        self.check_query(query)?;
        self.single_scorer(query, similarity)
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.inner.header.dimension as usize {
            return Err(Error::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.inner.header.dimension
            )));
        }
        Ok(())
    }

    /// Exact-vector scorer when possible, NVQ otherwise.
    fn single_scorer(
        &self,
        query: &[f32],
        similarity: Similarity,
    ) -> Result<Box<dyn ScoreFn + 'a>> {
        let has_exact = self.inner.features.iter().any(|m| {
            matches!(
                m,
                FeatureMeta::InlineVectors { .. } | FeatureMeta::SeparatedVectors { .. }
            )
        });
        let has_nvq = self.inner.features.iter().any(|m| {
            matches!(
                m,
                FeatureMeta::NvqVectors { .. } | FeatureMeta::SeparatedNvq { .. }
            )
        });
        if !has_exact && !has_nvq {
            return Err(Error::InvalidArgument(
                "index stores no scorable vector feature".into(),
            ));
        }
        Ok(Box::new(DiskVectorScorer {
            inner: self.inner,
            query: query.to_vec(),
            similarity,
            exact: has_exact,
            scratch: RefCell::new(vec![0.0; self.inner.header.dimension as usize]),
        }))
    }
}

impl GraphView for OnDiskView<'_> {
    fn entry(&self) -> Option<(NodeId, usize)> {
        self.inner.entry
    }

    fn size(&self) -> usize {
        self.inner.live_count
    }

    fn id_upper_bound(&self) -> u32 {
        self.inner.header.id_upper_bound
    }

    fn contains(&self, node: NodeId) -> bool {
        (node as usize) < self.inner.live_rank.len() && self.inner.live.get(node)
    }

    fn neighbors_into(&self, level: usize, node: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        out.clear();
        for id in self.neighbors_iter(level, node)? {
            out.push(id);
        }
        Ok(())
    }
}

/// Exact or NVQ-reconstructed scorer reading vectors from the mapping.
struct DiskVectorScorer<'a> {
    inner: &'a DiskInner,
    query: Vec<f32>,
    similarity: Similarity,
    /// True when a full-vector feature backs the reads.
    exact: bool,
    scratch: RefCell<Vec<f32>>,
}

impl ScoreFn for DiskVectorScorer<'_> {
    fn similarity_to(&self, node: NodeId) -> Result<f32> {
        let mut scratch = self.scratch.borrow_mut();
        let found = if self.exact {
            self.inner.read_vector_into(node, &mut scratch)?
        } else {
            self.inner.read_nvq_into(node, &mut scratch)?
        };
        if !found {
            return Err(Error::InvalidArgument(
                "index stores no scorable vector feature".into(),
            ));
        }
        Ok(self.similarity.score(&self.query, &scratch))
    }

    fn is_exact(&self) -> bool {
        self.exact
    }
}

/// Fused-ADC scorer: `begin_expansion` bulk-scores a node's packed
/// neighbor block; single lookups hit the staged scores and fall back to
/// vector reads for seeds.
struct DiskFusedScorer<'a> {
    inner: &'a DiskInner,
    table: AdcTable,
    staged: RefCell<FxHashMap<NodeId, f32>>,
    fallback: Box<dyn ScoreFn + 'a>,
}

impl ScoreFn for DiskFusedScorer<'_> {
    fn similarity_to(&self, node: NodeId) -> Result<f32> {
        if let Some(&score) = self.staged.borrow().get(&node) {
            return Ok(score);
        }
        self.fallback.similarity_to(node)
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    fn is_exact(&self) -> bool {
        false
    }

    fn begin_expansion(&self, node: NodeId) -> Result<()> {
        let blob = self.inner.inline_blob(node, FeatureId::FusedAdc)?;
        let neighbors: Vec<NodeId> = {
            let section = self.inner.neighbors(0, node)?;
            self.inner.parse_neighbor_ids(section)?.collect()
        };
        let lanes = neighbors.len().min(FUSED_LANES);
        let mut scores = [0.0f32; FUSED_LANES];
        self.table.score_block(blob, lanes, &mut scores);

        let mut staged = self.staged.borrow_mut();
        staged.clear();
        for (lane, &neighbor) in neighbors.iter().take(lanes).enumerate() {
            staged.insert(neighbor, scores[lane]);
        }
        Ok(())
    }
}
