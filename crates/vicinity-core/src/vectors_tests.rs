//! Tests for the `vectors` module.

use crate::error::Error;
use crate::vectors::{SliceVectorSource, VectorSource};

#[test]
fn test_from_vecs_round_trip() {
    let source =
        SliceVectorSource::from_vecs(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
    assert_eq!(source.size(), 3);
    assert_eq!(source.dimension(), 2);
    assert_eq!(source.get(1).unwrap(), vec![3.0, 4.0]);
    assert!(!source.is_value_shared());
}

#[test]
fn test_get_out_of_range() {
    let source = SliceVectorSource::from_vecs(&[vec![1.0, 2.0]]).unwrap();
    assert!(matches!(
        source.get(1),
        Err(Error::OutOfRange { ordinal: 1, .. })
    ));
}

#[test]
fn test_get_into_packs_at_offset() {
    let source = SliceVectorSource::from_vecs(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let mut packed = vec![0.0; 4];
    source.get_into(1, &mut packed, 0).unwrap();
    source.get_into(0, &mut packed, 2).unwrap();
    assert_eq!(packed, vec![3.0, 4.0, 1.0, 2.0]);
}

#[test]
fn test_get_into_rejects_short_destination() {
    let source = SliceVectorSource::from_vecs(&[vec![1.0, 2.0]]).unwrap();
    let mut packed = vec![0.0; 3];
    assert!(matches!(
        source.get_into(0, &mut packed, 2),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_from_vecs_rejects_mixed_dimensions() {
    let err = SliceVectorSource::from_vecs(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_from_packed_rejects_partial_vector() {
    assert!(SliceVectorSource::from_packed(vec![0.0; 5], 2).is_err());
    assert!(SliceVectorSource::from_packed(vec![0.0; 6], 0).is_err());
}

#[test]
fn test_copy_is_independent_handle() {
    let source = SliceVectorSource::from_vecs(&[vec![7.0, 8.0]]).unwrap();
    let copied = source.copy();
    assert_eq!(copied.size(), 1);
    assert_eq!(copied.get(0).unwrap(), vec![7.0, 8.0]);
}
