//! Random-access vector sources.
//!
//! A [`VectorSource`] hands the builder and scorers their coordinates. The
//! graph only ever stores ordinals; vectors stay owned by the source, which
//! may be an in-memory array, a memory-mapped file, or anything else that
//! can answer `get` by ordinal.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::NodeId;

/// Random access to a fixed-dimension collection of float vectors.
///
/// `get` must be thread-safe. Sources that reuse an internal buffer across
/// calls report it via [`VectorSource::is_value_shared`]; callers must copy
/// such values before the next `get` on the same handle, or take a
/// thread-local duplicate with [`VectorSource::copy`].
pub trait VectorSource: Send + Sync {
    /// Number of vectors (the exclusive ordinal upper bound).
    fn size(&self) -> usize;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Returns the vector at `ord`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `ord >= size()`.
    fn get(&self, ord: NodeId) -> Result<Vec<f32>>;

    /// Writes the vector at `ord` into `dst[offset..offset + dimension]`.
    ///
    /// Lets batched comparison fill a packed buffer without an intermediate
    /// allocation.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `ord >= size()` and `InvalidArgument` when
    /// the destination slice is too short.
    fn get_into(&self, ord: NodeId, dst: &mut [f32], offset: usize) -> Result<()>;

    /// True when values returned by `get` share an internal buffer.
    fn is_value_shared(&self) -> bool {
        false
    }

    /// Returns an independent handle safe to move to another thread.
    fn copy(&self) -> Box<dyn VectorSource>;
}

/// In-memory vector source over one packed `f32` slab.
///
/// Vectors live contiguously (`ord * dimension ..`), which keeps scans and
/// `get_into` copies cache-friendly. Values are never shared: `get` returns
/// an owned copy, so this source is freely usable across threads.
#[derive(Debug, Clone)]
pub struct SliceVectorSource {
    data: Arc<Vec<f32>>,
    dimension: usize,
}

impl SliceVectorSource {
    /// Creates a source from a packed slab of `count * dimension` floats.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dimension` is zero or `data` is not a
    /// whole number of vectors.
    pub fn from_packed(data: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidArgument("dimension must be positive".into()));
        }
        if data.len() % dimension != 0 {
            return Err(Error::InvalidArgument(format!(
                "packed length {} is not a multiple of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            dimension,
        })
    }

    /// Creates a source by packing individual vectors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on an empty input or inconsistent
    /// dimensions.
    pub fn from_vecs(vectors: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(Error::InvalidArgument(
                "cannot build a vector source from zero vectors".into(),
            ));
        };
        let dimension = first.len();
        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dimension {
                return Err(Error::InvalidArgument(format!(
                    "vector {i} has dimension {}, expected {dimension}",
                    v.len()
                )));
            }
            data.extend_from_slice(v);
        }
        Self::from_packed(data, dimension)
    }

    /// Borrows the vector at `ord` without copying.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `ord >= size()`.
    pub fn slice(&self, ord: NodeId) -> Result<&[f32]> {
        let count = self.size();
        Error::check_ordinal(ord, u32::try_from(count).unwrap_or(u32::MAX))?;
        let start = ord as usize * self.dimension;
        Ok(&self.data[start..start + self.dimension])
    }
}

impl VectorSource for SliceVectorSource {
    fn size(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn get(&self, ord: NodeId) -> Result<Vec<f32>> {
        Ok(self.slice(ord)?.to_vec())
    }

    fn get_into(&self, ord: NodeId, dst: &mut [f32], offset: usize) -> Result<()> {
        let src = self.slice(ord)?;
        let end = offset + self.dimension;
        if dst.len() < end {
            return Err(Error::InvalidArgument(format!(
                "destination too short: need {end}, have {}",
                dst.len()
            )));
        }
        dst[offset..end].copy_from_slice(src);
        Ok(())
    }

    fn copy(&self) -> Box<dyn VectorSource> {
        Box::new(self.clone())
    }
}
