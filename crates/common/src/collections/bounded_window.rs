//! A capacity-bounded, insertion-ordered history.
//!
//! [`BoundedWindow`] keeps at most `capacity` items. Pushing into a full
//! window evicts the oldest item and hands it back to the caller, and a
//! running eviction counter is kept so owners can report how much history
//! has rolled off.
//!
//! # Complexity
//! - `push`, `len`, `is_full`, `front`, `back` are **O(1)**.
//! - `iter` walks oldest to newest.

use std::collections::VecDeque;

/// Fixed-capacity FIFO history with evict-oldest semantics
///
/// ```rust
/// use keel_common::collections::BoundedWindow;
///
/// let mut window = BoundedWindow::new(2);
/// assert_eq!(window.push(1), None);
/// assert_eq!(window.push(2), None);
/// assert_eq!(window.push(3), Some(1));
/// assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
/// assert_eq!(window.evicted(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> BoundedWindow<T> {
    /// Creates an empty window. A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity.min(1024)), capacity, evicted: 0 }
    }

    /// Appends `item`, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of entries evicted since creation (survives `clear`).
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.items.iter()
    }

    /// Number of entries matching `predicate`.
    pub fn count_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        self.items.iter().filter(|item| predicate(item)).count()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedWindow<T> {
    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Extend<T> for BoundedWindow<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
