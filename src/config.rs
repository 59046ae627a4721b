use crate::sort::SortKind;

/// Level-0 capacity of a disk-backed engine, in entries.
pub const DEFAULT_MEMORY_SIZE: usize = 2_000_000;

/// Level-0 capacity of an all-memory engine, in entries.
pub const DEFAULT_MEMORY_SIZE_ALL_MEMORY: usize = 512;

/// Runs a level accumulates before it is compacted into the next level.
pub const DEFAULT_RUNS_PER_LEVEL: usize = 64;

/// Worker permits for the parallel merge-sort strategy.
pub const DEFAULT_SORT_POOL_SIZE: usize = 8;

/// Range length at or below which quicksort and the parallel merge sort
/// switch to insertion sort.
pub const DEFAULT_SORT_CUTOFF: usize = 25;

/// Fixed page size for disk-resident runs, in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Tunables for one storage engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entry capacity of level 0 and the base unit of deeper-level capacities
    pub memory_size: usize,

    /// Fan-out: run count per level that triggers compaction
    pub runs_per_level: usize,

    /// Sort strategy used to materialize level 0 at flush time
    pub sort: SortKind,

    /// Worker pool size for `SortKind::Parallel`
    pub sort_pool_size: usize,

    /// Insertion-sort cutoff for `SortKind::Quick` and `SortKind::Parallel`
    pub sort_cutoff: usize,

    /// Page size for disk-resident runs
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            runs_per_level: DEFAULT_RUNS_PER_LEVEL,
            sort: SortKind::Standard,
            sort_pool_size: DEFAULT_SORT_POOL_SIZE,
            sort_cutoff: DEFAULT_SORT_CUTOFF,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Defaults for an all-memory engine: a small level 0, everything else
    /// as the disk profile.
    pub fn all_memory() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE_ALL_MEMORY,
            ..Default::default()
        }
    }

    /// Set level-0 entry capacity
    pub fn memory_size(mut self, entries: usize) -> Self {
        self.memory_size = entries;
        self
    }

    /// Set the compaction fan-out
    pub fn runs_per_level(mut self, runs: usize) -> Self {
        self.runs_per_level = runs;
        self
    }

    /// Set the sort strategy for level-0 materialization
    pub fn sort(mut self, kind: SortKind) -> Self {
        self.sort = kind;
        self
    }

    /// Set the parallel-sort worker pool size
    pub fn sort_pool_size(mut self, permits: usize) -> Self {
        self.sort_pool_size = permits;
        self
    }

    /// Set the insertion-sort cutoff
    pub fn sort_cutoff(mut self, cutoff: usize) -> Self {
        self.sort_cutoff = cutoff;
        self
    }

    /// Set the run page size
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }
}
