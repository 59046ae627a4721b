//! The engine facade.
//!
//! [`LeveledStore`] owns the mutable level 0 and the chain of run
//! collectors, all created through one [`LevelFactory`]. Writes go into
//! level 0; when it fills, its content is sorted by the configured strategy
//! and flushed as exactly one run into level 1, which may cascade
//! compactions arbitrarily deep before the call returns. The store is the
//! single `&mut` mutation path into the tree, which is what makes
//! concurrent level mutation structurally impossible.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::level::{LevelFactory, MemoryLevel, MergeIter, RunCollector};
use crate::run::EntryStream;

pub struct LeveledStore<K, V> {
    factory: LevelFactory<K, V>,
    level0: MemoryLevel<K, V>,
    root: Option<Box<RunCollector<K, V>>>,
    flushes: u64,
}

impl<K, V> LeveledStore<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(factory: LevelFactory<K, V>) -> Self {
        let level0 = factory.create_level0();
        Self {
            factory,
            level0,
            root: None,
            flushes: 0,
        }
    }

    pub fn factory(&self) -> &LevelFactory<K, V> {
        &self.factory
    }

    /// Insert a live key/value pair.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        self.put(Entry::occupied(key, value))
    }

    /// Mark a key deleted. The tombstone keeps the key's sort position and
    /// supersedes older values during compaction and scans.
    pub fn remove(&mut self, key: K) -> Result<()> {
        self.put(Entry::tombstone(key))
    }

    /// Insert an entry, flushing level 0 first if it is full.
    pub fn put(&mut self, entry: Entry<K, V>) -> Result<()> {
        if self.level0.is_full() {
            self.flush()?;
        }
        if !self.level0.push(entry) {
            return Err(Error::InvalidOperation(
                "level 0 has zero capacity".to_string(),
            ));
        }
        Ok(())
    }

    /// Flush level 0 as one run into level 1, cascading compactions as far
    /// as they go. No-op when level 0 is empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.level0.is_empty() {
            return Ok(());
        }

        let level0 = std::mem::replace(&mut self.level0, self.factory.create_level0());
        let buffered = level0.len();

        let run_index = self.factory.next_run_index();
        let mut writer = self.factory.begin_run(1, run_index)?;
        for entry in level0.drain_sorted() {
            if let Err(e) = writer.push(entry) {
                writer.abort();
                return Err(e);
            }
        }
        let run = writer.finish()?;

        self.flushes += 1;
        tracing::info!(
            buffered,
            entries = run.entry_count(),
            run_index,
            "Flushed memory level to run"
        );

        let factory = &self.factory;
        let root = self
            .root
            .get_or_insert_with(|| Box::new(factory.create_collector(1)));
        root.add_run(run, factory)
    }

    /// Merged view of the whole engine in ascending key order, tombstones
    /// included, one winning container per key (shallower levels and newer
    /// runs supersede deeper and older ones). Flushes level 0 first so the
    /// one-shot sort buffer is never iterated in place.
    pub fn scan_entries(&mut self) -> Result<MergeIter<K, V>> {
        self.flush()?;

        let mut chain: Vec<&RunCollector<K, V>> = Vec::new();
        let mut current = self.root.as_deref();
        while let Some(collector) = current {
            chain.push(collector);
            current = collector.next_level();
        }

        // Deepest level first and oldest run first within a level, so the
        // highest stream index, the recency winner, is the newest data.
        let mut sources: Vec<EntryStream<K, V>> = Vec::new();
        for collector in chain.iter().rev() {
            for run in collector.runs() {
                sources.push(run.stream());
            }
        }

        MergeIter::new(sources, self.factory.ordering().key_cmp())
    }

    /// Like [`LeveledStore::scan_entries`], but tombstones filtered out and
    /// containers unwrapped to live values.
    pub fn scan(&mut self) -> Result<impl Iterator<Item = Result<(K, V)>>> {
        Ok(self.scan_entries()?.filter_map(|item| match item {
            Ok(entry) => entry
                .container
                .into_value()
                .map(|value| Ok((entry.key, value))),
            Err(e) => Some(Err(e)),
        }))
    }

    /// Snapshot of the tree shape for monitoring and tests.
    pub fn stats(&self) -> StoreStats {
        let mut levels = Vec::new();
        let mut compactions = 0;

        let mut current = self.root.as_deref();
        while let Some(collector) = current {
            levels.push(LevelStats {
                level: collector.level(),
                runs: collector.run_count(),
                entries: collector.runs().iter().map(|r| r.entry_count()).sum(),
                bytes: collector.runs().iter().map(|r| r.meta().bytes).sum(),
                capacity: collector.nominal_capacity(),
            });
            compactions += collector.compactions();
            current = collector.next_level();
        }

        StoreStats {
            level0_entries: self.level0.len(),
            levels,
            flushes: self.flushes,
            compactions,
        }
    }
}

/// Per-level shape snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelStats {
    pub level: u32,
    pub runs: usize,
    pub entries: u64,
    pub bytes: u64,
    pub capacity: u64,
}

/// Whole-store shape snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub level0_entries: usize,
    pub levels: Vec<LevelStats>,
    pub flushes: u64,
    pub compactions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::order::KeyOrdering;
    use crate::registry::Registry;
    use crate::run::codec::TripleCodec;
    use crate::sort::SortKind;
    use crate::tmpfs::TempDir;
    use std::sync::Arc;

    fn memory_store(memory_size: usize, runs_per_level: usize) -> LeveledStore<u32, u32> {
        let config = EngineConfig::all_memory()
            .memory_size(memory_size)
            .runs_per_level(runs_per_level)
            .sort(SortKind::Quick);
        LeveledStore::new(LevelFactory::memory(KeyOrdering::Natural, config))
    }

    fn live_pairs(store: &mut LeveledStore<u32, u32>) -> Vec<(u32, u32)> {
        store
            .scan()
            .expect("scan")
            .collect::<Result<Vec<_>>>()
            .expect("entries")
    }

    #[test]
    fn flush_produces_exactly_one_sorted_run() {
        let mut store = memory_store(8, 4);
        for key in [5u32, 2, 7, 1, 6, 3] {
            store.insert(key, key * 10).expect("insert");
        }

        store.flush().expect("flush");

        let stats = store.stats();
        assert_eq!(stats.level0_entries, 0);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.levels.len(), 1);
        assert_eq!(stats.levels[0].level, 1);
        assert_eq!(stats.levels[0].runs, 1);
        assert_eq!(stats.levels[0].entries, 6);

        assert_eq!(
            live_pairs(&mut store),
            vec![(1, 10), (2, 20), (3, 30), (5, 50), (6, 60), (7, 70)]
        );
    }

    #[test]
    fn overflow_flushes_automatically() {
        let mut store = memory_store(4, 8);
        for key in 0..10u32 {
            store.insert(key, key).expect("insert");
        }

        let stats = store.stats();
        assert!(stats.flushes >= 2);
        assert_eq!(stats.level0_entries, 2);
    }

    #[test]
    fn compaction_cascades_and_preserves_data() {
        let mut store = memory_store(2, 2);
        // 8 entries → 4 flushes → 2 level-1 compactions → 1 level-2
        // compaction; everything ends up in one deep run.
        for key in (0..8u32).rev() {
            store.insert(key, key + 100).expect("insert");
        }
        store.flush().expect("flush");

        let stats = store.stats();
        assert!(stats.compactions >= 3);

        let expected: Vec<(u32, u32)> = (0..8u32).map(|k| (k, k + 100)).collect();
        assert_eq!(live_pairs(&mut store), expected);
    }

    #[test]
    fn last_writer_wins_across_runs() {
        let mut store = memory_store(2, 4);
        store.insert(1, 100).expect("insert");
        store.insert(2, 200).expect("insert");
        store.flush().expect("flush");

        store.insert(1, 101).expect("insert");
        store.flush().expect("flush");

        let pairs = live_pairs(&mut store);
        assert_eq!(pairs, vec![(1, 101), (2, 200)]);
    }

    #[test]
    fn tombstones_hide_older_values() {
        let mut store = memory_store(4, 2);
        store.insert(1, 10).expect("insert");
        store.insert(2, 20).expect("insert");
        store.flush().expect("flush");

        store.remove(1).expect("remove");
        store.flush().expect("flush");

        assert_eq!(live_pairs(&mut store), vec![(2, 20)]);

        // The tombstone itself survives compaction in the merged view.
        let entries: Vec<_> = store
            .scan_entries()
            .expect("scan")
            .collect::<Result<Vec<_>>>()
            .expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].container.is_tombstone());
    }

    #[test]
    fn scan_on_empty_store() {
        let mut store = memory_store(4, 4);
        assert_eq!(live_pairs(&mut store), Vec::<(u32, u32)>::new());
    }

    #[test]
    fn unflushed_level0_is_visible_to_scan() {
        let mut store = memory_store(8, 4);
        store.insert(3, 30).expect("insert");
        store.insert(1, 10).expect("insert");
        assert_eq!(live_pairs(&mut store), vec![(1, 10), (3, 30)]);
    }

    #[test]
    fn disk_store_end_to_end() {
        let registry = Registry::for_triples();
        let dir = TempDir::new().expect("Failed to create temp dir");

        let config = EngineConfig::default()
            .memory_size(16)
            .runs_per_level(2)
            .page_size(256);
        let factory: LevelFactory<[u64; 3], u64> = LevelFactory::disk(
            dir.path(),
            KeyOrdering::Natural,
            Arc::new(TripleCodec::delta()),
            config,
            &registry,
        )
        .expect("disk factory");

        let mut store = LeveledStore::new(factory);
        for i in (0..100u64).rev() {
            store.insert([i / 10, i % 10, i], i).expect("insert");
        }
        store.flush().expect("flush");

        let stats = store.stats();
        assert!(stats.compactions >= 1);
        assert!(stats.levels.iter().any(|l| l.bytes > 0));

        let pairs: Vec<([u64; 3], u64)> = store
            .scan()
            .expect("scan")
            .collect::<Result<Vec<_>>>()
            .expect("entries");
        assert_eq!(pairs.len(), 100);
        assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(pairs.iter().all(|(key, value)| key[2] == *value));
    }
}
