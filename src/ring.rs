//! Bounded FIFO buffer for captured telemetry.
//!
//! Console entries, network entries, and managed-process log lines all go
//! through this type: push evicts the oldest entry once capacity is reached,
//! so a chatty page or dev server can never grow memory without bound.

use std::collections::VecDeque;

/// Fixed-capacity FIFO. Capacity is set at construction and never changes.
#[derive(Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an item, discarding the oldest one when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Return everything in arrival order and clear the buffer.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Return the items matching `pred` and retain the rest, preserving order.
    pub fn drain_where<F: FnMut(&T) -> bool>(&mut self, mut pred: F) -> Vec<T> {
        let mut matched = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if pred(&item) {
                matched.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        matched
    }

    /// Copy of the current contents without consuming them.
    pub fn peek(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn push_evicts_oldest_when_full() {
        let mut buf = RingBuffer::new(3);
        for i in 1..=4 {
            buf.push(i);
        }
        assert_eq!(buf.peek(), vec![2, 3, 4]);
    }

    #[test]
    fn drain_returns_all_and_clears() {
        let mut buf = RingBuffer::new(5);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.drain(), vec!["a", "b"]);
        assert!(buf.is_empty());
        assert_eq!(buf.drain(), Vec::<&str>::new());
    }

    #[test]
    fn drain_where_partitions_preserving_order() {
        let mut buf = RingBuffer::new(10);
        for i in 1..=5 {
            buf.push(i);
        }
        let evens = buf.drain_where(|i| i % 2 == 0);
        assert_eq!(evens, vec![2, 4]);
        assert_eq!(buf.peek(), vec![1, 3, 5]);
    }

    #[test]
    fn peek_is_a_copy() {
        let mut buf = RingBuffer::new(2);
        buf.push(1);
        let snapshot = buf.peek();
        buf.push(2);
        buf.push(3);
        assert_eq!(snapshot, vec![1]);
        assert_eq!(buf.peek(), vec![2, 3]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buf = RingBuffer::new(0);
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.peek(), vec![2]);
    }

    proptest! {
        /// After N pushes into capacity C, the buffer holds the last
        /// min(N, C) pushes in order.
        #[test]
        fn holds_last_min_n_c_in_order(
            capacity in 1usize..64,
            values in proptest::collection::vec(any::<u32>(), 0..256),
        ) {
            let mut buf = RingBuffer::new(capacity);
            for v in &values {
                buf.push(*v);
            }
            let expected_len = values.len().min(capacity);
            prop_assert_eq!(buf.len(), expected_len);
            let expected: Vec<u32> =
                values[values.len() - expected_len..].to_vec();
            prop_assert_eq!(buf.peek(), expected);
        }
    }
}
