//! Levels of the merge tree.
//!
//! Level 0 is the only mutable level: a bounded, unsorted buffer whose
//! content is sorted by a pluggable strategy when it is flushed. Every
//! deeper level is a [`RunCollector`] holding immutable sorted runs and
//! compacting them once the fan-out threshold is reached.

pub mod collector;
pub mod factory;
pub mod iterator;

pub use collector::RunCollector;
pub use factory::{LevelBackend, LevelFactory};
pub use iterator::MergeIter;

use itertools::Itertools;
use std::cmp::Ordering;

use crate::entry::Entry;
use crate::order::Cmp;
use crate::sort::SortStrategy;

/// Either kind of level, as handed out by the factory.
pub enum Level<K, V> {
    Memory(MemoryLevel<K, V>),
    Collector(RunCollector<K, V>),
}

impl<K, V> Level<K, V> {
    pub fn level_number(&self) -> u32 {
        match self {
            Level::Memory(_) => 0,
            Level::Collector(c) => c.level(),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Level::Memory(_))
    }
}

/// The mutable level 0: entries accumulate unsorted in the backing sort
/// strategy and come out sorted, deduplicated to the most recent container
/// per key, when the level is drained for a flush.
pub struct MemoryLevel<K, V> {
    strategy: Box<dyn SortStrategy<Entry<K, V>>>,
    cmp: Cmp<K>,
    capacity: usize,
}

impl<K, V> MemoryLevel<K, V>
where
    K: 'static,
    V: 'static,
{
    pub(crate) fn new(
        capacity: usize,
        strategy: Box<dyn SortStrategy<Entry<K, V>>>,
        cmp: Cmp<K>,
    ) -> Self {
        Self {
            strategy,
            cmp,
            capacity,
        }
    }

    /// Insert an entry. Returns false (and drops the entry) once the level
    /// is full; callers check [`MemoryLevel::is_full`] and flush first.
    pub fn push(&mut self, entry: Entry<K, V>) -> bool {
        if self.is_full() {
            return false;
        }
        self.strategy.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.strategy.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.strategy.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.strategy.is_full()
    }

    /// Consume the level, yielding its entries sorted by key. Adjacent
    /// entries with equal keys collapse to the later one, which under a
    /// stable strategy is the most recently inserted: last writer wins
    /// within a flush.
    pub fn drain_sorted(self) -> impl Iterator<Item = Entry<K, V>> {
        let cmp = self.cmp;
        self.strategy.drain().coalesce(move |a, b| {
            if cmp(&a.key, &b.key) == Ordering::Equal {
                Ok(b)
            } else {
                Err((a, b))
            }
        })
    }
}
