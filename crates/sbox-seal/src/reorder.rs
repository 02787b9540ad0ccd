//! Reorder buffer: accepts records in completion order, releases them in
//! index order.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    /// `start` is the first index that will be released.
    pub fn new(start: u64) -> Self {
        Self {
            next: start,
            pending: BTreeMap::new(),
        }
    }

    /// Park a record. Hands the item back if its index was already released
    /// or is already parked.
    pub fn insert(&mut self, index: u64, item: T) -> Result<(), T> {
        if index < self.next || self.pending.contains_key(&index) {
            return Err(item);
        }
        self.pending.insert(index, item);
        Ok(())
    }

    /// Release the next record if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Index the next `pop_ready` is waiting for.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Records parked behind a gap.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
