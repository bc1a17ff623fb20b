//! Subvector split arithmetic.

use crate::error::{Error, Result};

/// Splits `dimension` into `m` contiguous subvector sizes differing by at
/// most one, larger subvectors first.
///
/// # Errors
///
/// Returns `InvalidArgument` unless `1 <= m <= dimension`.
pub(crate) fn split_dimension(dimension: usize, m: usize) -> Result<Vec<usize>> {
    if m == 0 || m > dimension {
        return Err(Error::InvalidArgument(format!(
            "subspace count {m} must be in 1..={dimension}"
        )));
    }
    let base = dimension / m;
    let extra = dimension % m;
    Ok((0..m).map(|i| base + usize::from(i < extra)).collect())
}

/// Prefix-sum offsets for a subvector size list.
pub(crate) fn prefix_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut acc = 0;
    for &size in sizes {
        offsets.push(acc);
        acc += size;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        assert_eq!(split_dimension(8, 4).unwrap(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_uneven_split_differs_by_at_most_one() {
        let sizes = split_dimension(10, 3).unwrap();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_offsets() {
        assert_eq!(prefix_offsets(&[4, 3, 3]), vec![0, 4, 7]);
    }

    #[test]
    fn test_invalid_m() {
        assert!(split_dimension(4, 0).is_err());
        assert!(split_dimension(4, 5).is_err());
    }
}
