//! Fixed-capacity, newest-first list.

use std::collections::VecDeque;

use serde::{Serialize, Serializer};

/// Ordered list with a fixed capacity.
///
/// Inserts go to the front; once full, the oldest element falls off the
/// back. `len() <= capacity()` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedList<T> {
    /// Create an empty list. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an item, returning the evicted oldest item if the list was
    /// full
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_front(item);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    /// Replace the contents with `items`, given newest first. Anything past
    /// capacity is dropped.
    pub fn reset(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.clear();
        self.items.extend(items.into_iter().take(self.capacity));
    }

    /// Replace the first item matching `matches`. Returns whether one was
    /// found.
    pub fn replace_where(&mut self, matches: impl Fn(&T) -> bool, item: T) -> bool {
        match self.items.iter_mut().find(|existing| matches(existing)) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, matches: impl Fn(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| matches(item))
    }

    pub fn contains_where(&self, matches: impl Fn(&T) -> bool) -> bool {
        self.find(matches).is_some()
    }

    /// Most recently inserted item
    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedList<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}
