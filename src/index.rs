//! Ordered key-aggregation index used by group-by-key and reduce-by-key stages.
//!
//! The index is built incrementally, one `(key, value)` pair at a time, and
//! traversed once in key order when it is flushed. Keys are kept in a
//! [`BTreeMap`], so the emission order is the sorted key order: reproducible,
//! but not the input order.
//!
//! In [`GroupMode::Partial`] a stage flushes and resets the index every
//! `flush_every` absorbed values. That bounds memory by the number of distinct
//! keys per chunk, at the price of emitting a recurring key once per chunk; no
//! cross-chunk merge happens. Callers that need one result per key run a
//! second grouping pass over the partial output.

use std::collections::BTreeMap;
use std::collections::btree_map::{Entry, IntoIter};

/// How a grouping stage bounds its index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupMode {
    /// Accumulate the whole stream, emit every key exactly once at the end.
    Full,
    /// Flush and reset the index every `flush_every` values.
    Partial { flush_every: usize },
}

impl GroupMode {
    /// Whether an index that absorbed `absorbed` values since its last flush is due.
    #[must_use]
    pub fn due(&self, absorbed: usize) -> bool {
        match *self {
            Self::Full => false,
            Self::Partial { flush_every } => absorbed >= flush_every.max(1),
        }
    }
}

/// Ordered `key -> aggregate` index.
#[derive(Debug)]
pub struct GroupingIndex<K, A> {
    entries: BTreeMap<K, A>,
    absorbed: usize,
}

impl<K: Ord, A> Default for GroupingIndex<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, A> GroupingIndex<K, A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            absorbed: 0,
        }
    }

    /// Insert `value` under `key`: `seed` builds a new entry, `merge` folds into an existing one.
    pub fn upsert<V>(
        &mut self,
        key: K,
        value: V,
        seed: impl FnOnce(V) -> A,
        merge: impl FnOnce(&mut A, V),
    ) {
        self.absorbed += 1;
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(seed(value));
            }
            Entry::Occupied(mut slot) => merge(slot.get_mut(), value),
        }
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values inserted since the last [`drain`](Self::drain).
    #[must_use]
    pub fn absorbed(&self) -> usize {
        self.absorbed
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&A> {
        self.entries.get(key)
    }

    /// Take every entry in key order and leave a fresh, empty index behind.
    pub fn drain(&mut self) -> IntoIter<K, A> {
        self.absorbed = 0;
        std::mem::take(&mut self.entries).into_iter()
    }
}

impl<K: Ord, V> GroupingIndex<K, Vec<V>> {
    /// Append `value` to the list kept for `key`.
    pub fn group(&mut self, key: K, value: V) {
        self.upsert(key, value, |v| vec![v], |list, v| list.push(v));
    }
}

impl<K: Ord, V> GroupingIndex<K, V> {
    /// Left-fold `value` into the accumulator for `key` with `combine`.
    ///
    /// The first value seen for a key becomes its accumulator.
    pub fn reduce(&mut self, key: K, value: V, combine: impl FnOnce(V, V) -> V) {
        self.absorbed += 1;
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                let (key, acc) = slot.remove_entry();
                self.entries.insert(key, combine(acc, value));
            }
        }
    }
}
