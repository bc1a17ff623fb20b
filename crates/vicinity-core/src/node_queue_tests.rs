//! Tests for the `node_queue` module.

use crate::node_queue::{NodeQueue, QueueOrder};

#[test]
fn test_max_first_pops_best() {
    let mut q = NodeQueue::new(QueueOrder::MaxFirst);
    q.push(1, 0.2);
    q.push(2, 0.9);
    q.push(3, 0.5);

    assert_eq!(q.pop(), Some((2, 0.9)));
    assert_eq!(q.pop(), Some((3, 0.5)));
    assert_eq!(q.pop(), Some((1, 0.2)));
    assert_eq!(q.pop(), None);
}

#[test]
fn test_max_first_ties_pop_smallest_ordinal() {
    let mut q = NodeQueue::new(QueueOrder::MaxFirst);
    q.push(9, 0.5);
    q.push(3, 0.5);
    q.push(6, 0.5);

    assert_eq!(q.pop(), Some((3, 0.5)));
    assert_eq!(q.pop(), Some((6, 0.5)));
    assert_eq!(q.pop(), Some((9, 0.5)));
}

#[test]
fn test_min_first_pops_worst() {
    let mut q = NodeQueue::new(QueueOrder::MinFirst);
    q.push(1, 0.2);
    q.push(2, 0.9);

    assert_eq!(q.peek(), Some((1, 0.2)));
    assert_eq!(q.pop(), Some((1, 0.2)));
    assert_eq!(q.pop(), Some((2, 0.9)));
}

#[test]
fn test_push_bounded_evicts_worst() {
    let mut q = NodeQueue::new(QueueOrder::MinFirst);
    assert!(q.push_bounded(1, 0.3, 2));
    assert!(q.push_bounded(2, 0.5, 2));
    // worse than the current worst: rejected
    assert!(!q.push_bounded(3, 0.1, 2));
    // better: evicts node 1
    assert!(q.push_bounded(4, 0.8, 2));

    assert_eq!(q.len(), 2);
    assert_eq!(q.drain_sorted_desc(), vec![(4, 0.8), (2, 0.5)]);
}

#[test]
fn test_push_bounded_zero_capacity_rejects() {
    let mut q = NodeQueue::new(QueueOrder::MinFirst);
    assert!(!q.push_bounded(1, 0.9, 0));
    assert!(q.is_empty());
}

#[test]
fn test_drain_sorted_desc_breaks_ties_by_ordinal() {
    let mut q = NodeQueue::new(QueueOrder::MinFirst);
    q.push(9, 0.5);
    q.push(3, 0.5);
    q.push(1, 0.9);

    assert_eq!(q.drain_sorted_desc(), vec![(1, 0.9), (3, 0.5), (9, 0.5)]);
    assert!(q.is_empty());
}
