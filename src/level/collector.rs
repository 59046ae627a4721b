use crate::error::Result;
use crate::level::factory::LevelFactory;
use crate::level::iterator::MergeIter;
use crate::run::{EntryStream, Run};

/// Owns the runs of one level ≥ 1 and compacts them into the next level.
///
/// The collector is `Idle` while it holds fewer runs than the fan-out.
/// Receiving the run that reaches the threshold triggers a compaction:
/// a k-way merge of every run at this level, in ascending key order with
/// ties won by the most recently added run, written out as exactly one run for the
/// next level. The sources are discarded and the merged run forwarded only
/// after it exists in full, so a failed merge leaves this level's run set
/// untouched. Forwarding can trigger the next level's own compaction; the
/// cascade runs to completion before `add_run` returns.
pub struct RunCollector<K, V> {
    level: u32,
    nominal_capacity: u64,
    fan_out: usize,
    runs: Vec<Run<K, V>>,
    next: Option<Box<RunCollector<K, V>>>,
    compactions: u64,
}

impl<K, V> RunCollector<K, V> {
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl<K, V> RunCollector<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(level: u32, nominal_capacity: u64, fan_out: usize) -> Self {
        Self {
            level,
            nominal_capacity,
            // A fan-out below 2 would compact every run into a new level.
            fan_out: fan_out.max(2),
            runs: Vec::new(),
            next: None,
            compactions: 0,
        }
    }

    /// Entry capacity tier of this level per the geometric growth formula.
    pub fn nominal_capacity(&self) -> u64 {
        self.nominal_capacity
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn runs(&self) -> &[Run<K, V>] {
        &self.runs
    }

    /// The next-deeper level, if anything has cascaded into it yet.
    pub fn next_level(&self) -> Option<&RunCollector<K, V>> {
        self.next.as_deref()
    }

    /// Compactions this level has performed.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// Accept a run (a level-0 flush or a cascade from the level above) and
    /// compact if the fan-out threshold is reached.
    pub fn add_run(&mut self, run: Run<K, V>, factory: &LevelFactory<K, V>) -> Result<()> {
        self.runs.push(run);
        if self.runs.len() >= self.fan_out {
            self.compact(factory)?;
        }
        Ok(())
    }

    fn compact(&mut self, factory: &LevelFactory<K, V>) -> Result<()> {
        // Oldest stream first: the merge resolves duplicate keys in favor
        // of the highest-indexed (most recent) source.
        let sources: Vec<EntryStream<K, V>> = self.runs.iter().map(|run| run.stream()).collect();
        let source_count = sources.len();
        let merged = MergeIter::new(sources, factory.ordering().key_cmp())?;

        let run_index = factory.next_run_index();
        let mut writer = factory.begin_run(self.level + 1, run_index)?;

        let mut failed = None;
        for item in merged {
            if let Err(e) = item.and_then(|entry| writer.push(entry)) {
                failed = Some(e);
                break;
            }
        }
        if let Some(e) = failed {
            // Abort before anything is committed: this level keeps its
            // pre-compaction run set and the caller sees the error.
            writer.abort();
            return Err(e);
        }
        let merged_run = writer.finish()?;

        tracing::info!(
            level = self.level,
            sources = source_count,
            entries = merged_run.entry_count(),
            run_index,
            "Compacted level into next"
        );

        // Commit: the merged run exists in full, so the sources go now.
        for run in std::mem::take(&mut self.runs) {
            if let Err(e) = run.destroy() {
                tracing::warn!(level = self.level, error = %e, "Failed to reclaim merged source run");
            }
        }
        self.compactions += 1;

        let next = self
            .next
            .get_or_insert_with(|| Box::new(factory.create_collector(self.level + 1)));
        next.add_run(merged_run, factory)
    }
}
