//! Error types for Vicinity.
//!
//! This module provides a unified error type for all index operations.
//! Every fallible operation returns a [`Result`]; there is no out-of-band
//! control transfer anywhere in the crate.

use thiserror::Error;

/// Result type alias for Vicinity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vicinity operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
/// Error codes follow the pattern `VCN-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument (VCN-001).
    ///
    /// Dimension mismatch, degree below one, unknown similarity, or a
    /// nonexistent ordinal in a non-sparse context.
    #[error("[VCN-001] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Ordinal out of range (VCN-002).
    #[error("[VCN-002] Ordinal {ordinal} out of range (id upper bound {upper_bound})")]
    OutOfRange {
        /// The offending ordinal.
        ordinal: u32,
        /// The exclusive upper bound of the id space.
        upper_bound: u32,
    },

    /// IO error (VCN-003).
    #[error("[VCN-003] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Incompatible on-disk format (VCN-004).
    ///
    /// Magic mismatch, a version newer than supported, or unknown feature
    /// bits. The file is refused rather than silently adapted.
    #[error("[VCN-004] Incompatible index file: {0}")]
    IncompatibleVersion(String),

    /// Corrupt index file (VCN-005).
    ///
    /// Header internal inconsistency (e.g. overlapping offsets) or a
    /// neighbor id out of range.
    #[error("[VCN-005] Corrupt index file: {0}")]
    Corrupt(String),

    /// Operation cancelled (VCN-006).
    ///
    /// Reserved for future use; not produced by the core.
    #[error("[VCN-006] Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the error code (e.g., "VCN-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "VCN-001",
            Self::OutOfRange { .. } => "VCN-002",
            Self::Io(_) => "VCN-003",
            Self::IncompatibleVersion(_) => "VCN-004",
            Self::Corrupt(_) => "VCN-005",
            Self::Cancelled => "VCN-006",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Corrupt or incompatible files are not; the caller must rebuild or
    /// convert the index.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupt(_) | Self::IncompatibleVersion(_))
    }

    /// Shorthand for an [`Error::OutOfRange`] check against an upper bound.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `ordinal >= upper_bound`.
    pub fn check_ordinal(ordinal: u32, upper_bound: u32) -> Result<()> {
        if ordinal >= upper_bound {
            return Err(Self::OutOfRange {
                ordinal,
                upper_bound,
            });
        }
        Ok(())
    }
}
