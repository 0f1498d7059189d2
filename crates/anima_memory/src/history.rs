//! Bounded history ring with stable logical indices.
//!
//! Every pushed item gets the next logical index, and that index keeps
//! addressing the same item until the item falls off the front. Eviction of
//! the oldest item is O(1).

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    entries: VecDeque<T>,
    capacity: usize,
    /// Logical index of `entries[0]`.
    first_index: u64,
}

impl<T> HistoryRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            first_index: 0,
        }
    }

    /// Rebuild a ring from items whose first element had logical index
    /// `first_index`. Only the newest `capacity` items are kept.
    pub fn from_parts(capacity: usize, first_index: u64, items: Vec<T>) -> Self {
        let mut ring = Self::new(capacity);
        ring.first_index = first_index;
        for item in items {
            ring.push(item);
        }
        ring
    }

    /// Logical index the next pushed item will receive.
    pub fn next_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64
    }

    /// Append an item, evicting the oldest when full. Returns its logical index.
    pub fn push(&mut self, item: T) -> u64 {
        let index = self.next_index();
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.first_index += 1;
        }
        self.entries.push_back(item);
        index
    }

    pub fn get(&self, index: u64) -> Option<&T> {
        let offset = index.checked_sub(self.first_index)?;
        self.entries.get(usize::try_from(offset).ok()?)
    }

    /// The item `steps` positions before the newest (0 = newest).
    pub fn back(&self, steps: usize) -> Option<&T> {
        let len = self.entries.len();
        if steps >= len {
            return None;
        }
        self.entries.get(len - 1 - steps)
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
