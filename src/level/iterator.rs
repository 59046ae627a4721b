use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;
use crate::error::Result;
use crate::order::Cmp;
use crate::run::EntryStream;

/// K-way merge over sorted entry streams with a recency tie-break.
///
/// Streams are indexed by their position in the input vector; for duplicate
/// keys the entry from the *highest-indexed* stream wins and the rest are
/// skipped. Callers therefore pass streams oldest first, newest last, which
/// is exactly how a run collector holds its runs. Stream errors are
/// surfaced, not swallowed; after an error the merge ends.
pub struct MergeIter<K, V> {
    heap: BinaryHeap<MergeSource<K, V>>,
    cmp: Cmp<K>,
    last_key: Option<K>,
}

impl<K, V> MergeIter<K, V>
where
    K: Clone,
{
    pub fn new(sources: Vec<EntryStream<K, V>>, cmp: Cmp<K>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for (source, mut stream) in sources.into_iter().enumerate() {
            match stream.next() {
                Some(Ok(entry)) => heap.push(MergeSource {
                    entry,
                    source,
                    stream,
                    cmp: Cmp::clone(&cmp),
                }),
                Some(Err(e)) => return Err(e),
                None => {}
            }
        }

        Ok(Self {
            heap,
            cmp,
            last_key: None,
        })
    }
}

impl<K, V> Iterator for MergeIter<K, V>
where
    K: Clone,
{
    type Item = Result<Entry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.heap.pop() {
            let MergeSource {
                entry,
                source,
                mut stream,
                cmp,
            } = top;

            // Refill from the popped stream before deciding anything.
            match stream.next() {
                Some(Ok(next_entry)) => self.heap.push(MergeSource {
                    entry: next_entry,
                    source,
                    stream,
                    cmp,
                }),
                Some(Err(e)) => {
                    self.heap.clear();
                    return Some(Err(e));
                }
                None => {}
            }

            // Duplicate of the winner already emitted for this key: skip.
            if let Some(last) = &self.last_key {
                if (self.cmp)(last, &entry.key) == Ordering::Equal {
                    continue;
                }
            }

            self.last_key = Some(entry.key.clone());
            return Some(Ok(entry));
        }

        None
    }
}

struct MergeSource<K, V> {
    entry: Entry<K, V>,
    source: usize,
    stream: EntryStream<K, V>,
    cmp: Cmp<K>,
}

impl<K, V> PartialEq for MergeSource<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K, V> Eq for MergeSource<K, V> {}

impl<K, V> PartialOrd for MergeSource<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, V> Ord for MergeSource<K, V> {
    // Max-heap: smallest key pops first; among equal keys the
    // highest-indexed (most recent) stream pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.cmp)(&self.entry.key, &other.entry.key) {
            Ordering::Equal => self.source.cmp(&other.source),
            other => other.reverse(),
        }
    }
}
