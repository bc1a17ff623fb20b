//! Product quantizer training, encoding and persistence.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

use super::kmeans;
use super::subspace;
use crate::error::{Error, Result};
use crate::simd;
use crate::vectors::VectorSource;
use crate::NodeId;

/// Upper bound on training points per subspace; larger sets are strided.
const MAX_TRAINING_POINTS: usize = 65_536;

/// Product quantizer training parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqParams {
    /// Number of subspaces (`M`); each contributes one code byte.
    pub subspaces: usize,
    /// Centroids per subspace (`K`), at most 256.
    pub centroids: usize,
    /// Lloyd iteration budget per subspace.
    pub iterations: usize,
    /// PRNG seed; training is deterministic given the seed.
    pub seed: u64,
    /// Subtract the dataset centroid before encoding.
    ///
    /// Helps dot-product datasets whose mass is far from the origin.
    pub center_globally: bool,
}

impl Default for PqParams {
    fn default() -> Self {
        Self {
            subspaces: 8,
            centroids: 256,
            iterations: 15,
            seed: 0x5DEE_CE66_D1A4_B5B5,
            center_globally: false,
        }
    }
}

impl PqParams {
    fn validate(&self, dimension: usize) -> Result<()> {
        if self.subspaces == 0 || self.subspaces > dimension {
            return Err(Error::InvalidArgument(format!(
                "subspace count {} must be in 1..={dimension}",
                self.subspaces
            )));
        }
        if self.centroids < 2 || self.centroids > 256 {
            return Err(Error::InvalidArgument(format!(
                "centroid count {} must be in 2..=256",
                self.centroids
            )));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidArgument(
                "iteration count must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Trained product quantizer: per-subspace codebooks plus the split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    m: usize,
    k: usize,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
    /// Per subspace: `k * sizes[s]` floats, row per centroid.
    codebooks: Vec<Vec<f32>>,
    global_centroid: Option<Vec<f32>>,
}

impl ProductQuantizer {
    /// Trains a quantizer on every vector of `source`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for bad parameters or a training set
    /// smaller than the centroid count.
    pub fn train(source: &dyn VectorSource, params: &PqParams) -> Result<Self> {
        Self::train_weighted(source, params, None)
    }

    /// Trains with optional per-point anisotropic weights.
    ///
    /// `weights[i]` scales point `i`'s contribution to the clustering loss;
    /// `None` trains plain k-means.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for bad parameters, a weight slice whose
    /// length differs from the source size, or a training set smaller than
    /// the centroid count.
    pub fn train_weighted(
        source: &dyn VectorSource,
        params: &PqParams,
        weights: Option<&[f32]>,
    ) -> Result<Self> {
        let dimension = source.dimension();
        params.validate(dimension)?;
        let count = source.size();
        if count < params.centroids {
            return Err(Error::InvalidArgument(format!(
                "training set of {count} vectors is smaller than centroid count {}",
                params.centroids
            )));
        }
        if let Some(w) = weights {
            if w.len() != count {
                return Err(Error::InvalidArgument(format!(
                    "weight count {} does not match source size {count}",
                    w.len()
                )));
            }
        }

        // Stride-sample large training sets
        let step = count.div_ceil(MAX_TRAINING_POINTS).max(1);
        let picked: Vec<usize> = (0..count).step_by(step).collect();
        let sampled = picked.len();

        let mut training = vec![0.0f32; sampled * dimension];
        for (row, &ord) in picked.iter().enumerate() {
            let ord = u32::try_from(ord)
                .map_err(|_| Error::InvalidArgument("source too large".into()))?;
            source.get_into(ord, &mut training, row * dimension)?;
        }
        let sampled_weights: Option<Vec<f32>> =
            weights.map(|w| picked.iter().map(|&i| w[i]).collect());

        let global_centroid = if params.center_globally {
            let mut mean = vec![0.0f32; dimension];
            for row in 0..sampled {
                simd::add_in_place(&mut mean, &training[row * dimension..(row + 1) * dimension]);
            }
            #[allow(clippy::cast_precision_loss)]
            simd::scale(&mut mean, 1.0 / sampled as f32);
            for row in 0..sampled {
                simd::sub_in_place(
                    &mut training[row * dimension..(row + 1) * dimension],
                    &mean,
                );
            }
            Some(mean)
        } else {
            None
        };

        let sizes = subspace::split_dimension(dimension, params.subspaces)?;
        let offsets = subspace::prefix_offsets(&sizes);

        // Each subspace trains independently and in parallel
        let codebooks: Vec<Vec<f32>> = sizes
            .par_iter()
            .zip(offsets.par_iter())
            .enumerate()
            .map(|(s, (&size, &offset))| {
                let mut projected = vec![0.0f32; sampled * size];
                for row in 0..sampled {
                    let src = &training[row * dimension + offset..row * dimension + offset + size];
                    projected[row * size..(row + 1) * size].copy_from_slice(src);
                }
                let result = kmeans::train(
                    &projected,
                    size,
                    params.centroids,
                    params.iterations,
                    sampled_weights.as_deref(),
                    params.seed.wrapping_add(s as u64),
                );
                result.centroids
            })
            .collect();

        debug!(
            dimension,
            subspaces = params.subspaces,
            centroids = params.centroids,
            sampled,
            "trained product quantizer"
        );

        Ok(Self {
            dimension,
            m: params.subspaces,
            k: params.centroids,
            sizes,
            offsets,
            codebooks,
            global_centroid,
        })
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of subspaces (`M`).
    #[must_use]
    pub fn subspaces(&self) -> usize {
        self.m
    }

    /// Centroids per subspace (`K`).
    #[must_use]
    pub fn centroids_per_subspace(&self) -> usize {
        self.k
    }

    /// Encoded length in bytes (one byte per subspace).
    #[must_use]
    pub fn code_len(&self) -> usize {
        self.m
    }

    /// The dataset centroid subtracted before encoding, if any.
    #[must_use]
    pub fn global_centroid(&self) -> Option<&[f32]> {
        self.global_centroid.as_deref()
    }

    /// Centroid row `code` of subspace `s`.
    ///
    /// # Panics
    ///
    /// Panics if `s` or `code` is out of range.
    #[must_use]
    pub fn centroid(&self, s: usize, code: u8) -> &[f32] {
        let size = self.sizes[s];
        let start = code as usize * size;
        &self.codebooks[s][start..start + size]
    }

    /// Byte range of subspace `s` within the full dimension.
    pub(crate) fn sub_range(&self, s: usize) -> std::ops::Range<usize> {
        self.offsets[s]..self.offsets[s] + self.sizes[s]
    }

    /// Encodes `vector` into `out` (one centroid index per subspace).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension or output-length mismatch.
    pub fn encode_into(&self, vector: &[f32], out: &mut [u8]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidArgument(format!(
                "vector dimension {} does not match quantizer dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        if out.len() != self.m {
            return Err(Error::InvalidArgument(format!(
                "code buffer length {} does not match subspace count {}",
                out.len(),
                self.m
            )));
        }
        let mut centered;
        let v = if let Some(g) = &self.global_centroid {
            centered = vector.to_vec();
            simd::sub_in_place(&mut centered, g);
            &centered[..]
        } else {
            vector
        };
        for s in 0..self.m {
            let sub = &v[self.sub_range(s)];
            let mut best = 0usize;
            let mut best_d = f32::INFINITY;
            for c in 0..self.k {
                let d = simd::squared_l2(sub, self.centroid(s, u8::try_from(c).expect("k <= 256")));
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            out[s] = u8::try_from(best).expect("k <= 256");
        }
        Ok(())
    }

    /// Encodes `vector` into a fresh code buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.m];
        self.encode_into(vector, &mut out)?;
        Ok(out)
    }

    /// Reconstructs the vector approximated by `code`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on length mismatch.
    pub fn decode_into(&self, code: &[u8], out: &mut [f32]) -> Result<()> {
        if code.len() != self.m {
            return Err(Error::InvalidArgument(format!(
                "code length {} does not match subspace count {}",
                code.len(),
                self.m
            )));
        }
        if out.len() != self.dimension {
            return Err(Error::InvalidArgument(format!(
                "output length {} does not match dimension {}",
                out.len(),
                self.dimension
            )));
        }
        for s in 0..self.m {
            let range = self.sub_range(s);
            out[range].copy_from_slice(self.centroid(s, code[s]));
        }
        if let Some(g) = &self.global_centroid {
            simd::add_in_place(out, g);
        }
        Ok(())
    }

    /// Encodes every vector of `source`, keyed by ordinal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on dimension mismatch.
    pub fn encode_all(&self, source: &dyn VectorSource) -> Result<PqCodeStore> {
        if source.dimension() != self.dimension {
            return Err(Error::InvalidArgument(format!(
                "source dimension {} does not match quantizer dimension {}",
                source.dimension(),
                self.dimension
            )));
        }
        let count = source.size();
        let mut codes = vec![0u8; count * self.m];
        codes
            .par_chunks_mut(self.m)
            .enumerate()
            .try_for_each(|(ord, chunk)| -> Result<()> {
                let ord = u32::try_from(ord)
                    .map_err(|_| Error::InvalidArgument("source too large".into()))?;
                let v = source.get(ord)?;
                self.encode_into(&v, chunk)
            })?;
        Ok(PqCodeStore {
            codes,
            stride: self.m,
            count,
        })
    }

    /// Saves the codebook to `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io` on file errors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).map_err(std::io::Error::other)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a codebook previously written by [`ProductQuantizer::save`].
    ///
    /// # Errors
    ///
    /// Returns `Io` on file errors and `Corrupt` when the contents do not
    /// deserialize to a consistent quantizer.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let loaded: Self = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| Error::Corrupt(format!("product quantizer codebook: {e}")))?;
        loaded.validate_shape()?;
        Ok(loaded)
    }

    /// Serializes the codebook for embedding in a disk feature header.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u32::try_from(self.dimension).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.m).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.k).unwrap_or(u32::MAX).to_le_bytes());
        out.push(u8::from(self.global_centroid.is_some()));
        if let Some(g) = &self.global_centroid {
            for &x in g {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        for s in 0..self.m {
            for &x in &self.codebooks[s] {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        out
    }

    /// Parses a codebook embedded in a disk feature header.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let dimension = read_u32(bytes, &mut cursor)? as usize;
        let m = read_u32(bytes, &mut cursor)? as usize;
        let k = read_u32(bytes, &mut cursor)? as usize;
        let has_global = *bytes
            .get(cursor)
            .ok_or_else(|| Error::Corrupt("truncated quantizer header".into()))?;
        cursor += 1;
        if m == 0 || m > dimension || k < 2 || k > 256 {
            return Err(Error::Corrupt(format!(
                "implausible quantizer shape: d={dimension} m={m} k={k}"
            )));
        }
        let global_centroid = if has_global != 0 {
            Some(read_f32s(bytes, &mut cursor, dimension)?)
        } else {
            None
        };
        let sizes = subspace::split_dimension(dimension, m)
            .map_err(|e| Error::Corrupt(e.to_string()))?;
        let offsets = subspace::prefix_offsets(&sizes);
        let mut codebooks = Vec::with_capacity(m);
        for &size in &sizes {
            codebooks.push(read_f32s(bytes, &mut cursor, k * size)?);
        }
        Ok(Self {
            dimension,
            m,
            k,
            sizes,
            offsets,
            codebooks,
            global_centroid,
        })
    }

    /// Byte length of [`ProductQuantizer::to_bytes`].
    pub(crate) fn header_len(&self) -> usize {
        13 + self.global_centroid.as_ref().map_or(0, |g| g.len() * 4)
            + self.sizes.iter().map(|&s| self.k * s * 4).sum::<usize>()
    }

    fn validate_shape(&self) -> Result<()> {
        if self.sizes.iter().sum::<usize>() != self.dimension
            || self.sizes.len() != self.m
            || self.codebooks.len() != self.m
            || self
                .codebooks
                .iter()
                .zip(&self.sizes)
                .any(|(cb, &size)| cb.len() != self.k * size)
        {
            return Err(Error::Corrupt(
                "product quantizer shape is internally inconsistent".into(),
            ));
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = *cursor + 4;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| Error::Corrupt("truncated quantizer header".into()))?;
    *cursor = end;
    Ok(u32::from_le_bytes(slice.try_into().expect("4 bytes")))
}

fn read_f32s(bytes: &[u8], cursor: &mut usize, count: usize) -> Result<Vec<f32>> {
    let end = *cursor + count * 4;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| Error::Corrupt("truncated quantizer header".into()))?;
    *cursor = end;
    Ok(slice
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
        .collect())
}

/// Encoded vectors, keyed by ordinal.
#[derive(Debug, Clone)]
pub struct PqCodeStore {
    codes: Vec<u8>,
    stride: usize,
    count: usize,
}

impl PqCodeStore {
    /// Number of encoded vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true when no vectors are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Code bytes of `ord`, or `None` past the end.
    #[must_use]
    pub fn get(&self, ord: NodeId) -> Option<&[u8]> {
        let ord = ord as usize;
        if ord >= self.count {
            return None;
        }
        Some(&self.codes[ord * self.stride..(ord + 1) * self.stride])
    }
}
