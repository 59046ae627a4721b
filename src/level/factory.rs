use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::level::collector::RunCollector;
use crate::level::{Level, MemoryLevel};
use crate::order::KeyOrdering;
use crate::pager::FilePager;
use crate::registry::Registry;
use crate::run::codec::{read_uvarint, write_uvarint, KvCodec};
use crate::run::{DiskRun, Run, RunWriter};
use crate::sort::SortOptions;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const RECORD_MAGIC: u32 = 0x5354_4346; // "STCF"
const RECORD_VERSION: u16 = 1;

/// File the disk backend persists its configuration record under.
pub const CONFIG_FILE: &str = "engine.conf";

/// Where a factory keeps its levels and runs.
pub enum LevelBackend {
    /// Everything in process memory; for embedded use and tests.
    Memory,
    /// Level 0 in memory, levels ≥ 1 paged to disk under `dir`.
    Disk { dir: PathBuf, instance: u64 },
}

/// Creates levels and runs, and owns the ordering, codec, and thresholds
/// for the lifetime of one storage engine.
///
/// A disk factory gets a distinct sub-path `<root>/lsm-tree/<instance>/`
/// from the registry's monotonic instance counter, so concurrently active
/// engines never collide on disk, and persists its configuration as a
/// self-describing record so the engine can be reopened after a restart.
pub struct LevelFactory<K, V> {
    ordering: KeyOrdering<K>,
    codec: Option<Arc<dyn KvCodec<K, V>>>,
    backend: LevelBackend,
    config: EngineConfig,
    next_run: AtomicU64,
}

impl<K, V> LevelFactory<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// An all-memory factory. Runs live in process memory and need no codec.
    pub fn memory(ordering: KeyOrdering<K>, config: EngineConfig) -> Self {
        Self {
            ordering,
            codec: None,
            backend: LevelBackend::Memory,
            config,
            next_run: AtomicU64::new(0),
        }
    }

    /// A disk-backed factory under `<root>/lsm-tree/<instance>/`.
    pub fn disk(
        root: impl AsRef<Path>,
        ordering: KeyOrdering<K>,
        codec: Arc<dyn KvCodec<K, V>>,
        config: EngineConfig,
        registry: &Registry<K, V>,
    ) -> Result<Self> {
        let instance = registry.next_instance();
        let dir = root.as_ref().join("lsm-tree").join(instance.to_string());
        fs::create_dir_all(&dir)?;

        Ok(Self {
            ordering,
            codec: Some(codec),
            backend: LevelBackend::Disk { dir, instance },
            config,
            next_run: AtomicU64::new(0),
        })
    }

    /// Reopen a persisted disk factory from its instance directory.
    ///
    /// The configuration record supplies the ordering, codec, path, and
    /// thresholds; `config` supplies the runtime-only tunables (sort
    /// strategy, pool size, page size). Unknown identifiers and malformed
    /// records are fatal; the factory refuses to open rather than guess.
    pub fn open(
        dir: impl AsRef<Path>,
        config: EngineConfig,
        registry: &Registry<K, V>,
    ) -> Result<Self> {
        let bytes = fs::read(dir.as_ref().join(CONFIG_FILE))?;
        let record = ConfigRecord::decode(&bytes)?;

        let ordering = match &record.ordering_name {
            None => KeyOrdering::Natural,
            Some(name) => registry.resolve_ordering(name)?,
        };
        let codec = registry.resolve_codec(&record.codec_id, &record.codec_state)?;

        let dir = PathBuf::from(&record.path);
        let instance = dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
            .unwrap_or(0);
        let next_run = next_free_run_index(&dir)?;

        Ok(Self {
            ordering,
            codec: Some(codec),
            backend: LevelBackend::Disk { dir, instance },
            config: EngineConfig {
                memory_size: record.memory_size as usize,
                runs_per_level: record.runs_per_level as usize,
                ..config
            },
            next_run: AtomicU64::new(next_run),
        })
    }

    pub fn ordering(&self) -> &KeyOrdering<K> {
        &self.ordering
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &LevelBackend {
        &self.backend
    }

    /// The instance directory for disk factories, `None` for memory.
    pub fn storage_path(&self) -> Option<&Path> {
        match &self.backend {
            LevelBackend::Memory => None,
            LevelBackend::Disk { dir, .. } => Some(dir),
        }
    }

    /// Nominal entry capacity of a level: `memory_size` at level 0, then
    /// `memory_size^L` for the memory backend and
    /// `memory_size × runs_per_level^(L-1)` for the disk backend.
    pub fn level_capacity(&self, level: u32) -> u64 {
        let memory_size = self.config.memory_size as u64;
        if level == 0 {
            return memory_size;
        }
        match &self.backend {
            LevelBackend::Memory => memory_size.saturating_pow(level),
            LevelBackend::Disk { .. } => {
                let fan_out = self.config.runs_per_level as u64;
                memory_size.saturating_mul(fan_out.saturating_pow(level - 1))
            }
        }
    }

    /// A fresh mutable level 0, backed by the configured sort strategy.
    pub fn create_level0(&self) -> MemoryLevel<K, V> {
        let opts = SortOptions {
            cutoff: self.config.sort_cutoff,
            pool_size: self.config.sort_pool_size,
        };
        let strategy =
            self.config
                .sort
                .strategy(self.config.memory_size, self.ordering.entry_cmp(), opts);
        MemoryLevel::new(self.config.memory_size, strategy, self.ordering.key_cmp())
    }

    /// A level by number: the mutable level 0, or an empty run collector.
    pub fn create_level(&self, level: u32) -> Level<K, V> {
        if level == 0 {
            Level::Memory(self.create_level0())
        } else {
            Level::Collector(self.create_collector(level))
        }
    }

    pub fn create_collector(&self, level: u32) -> RunCollector<K, V> {
        RunCollector::new(level, self.level_capacity(level), self.config.runs_per_level)
    }

    /// Next run index, unique within this factory.
    pub fn next_run_index(&self) -> u64 {
        self.next_run.fetch_add(1, Ordering::SeqCst)
    }

    /// Start materializing the run `(level, run_index)`.
    pub fn begin_run(&self, level: u32, run_index: u64) -> Result<RunWriter<K, V>> {
        match &self.backend {
            LevelBackend::Memory => Ok(RunWriter::memory(level, run_index)),
            LevelBackend::Disk { .. } => {
                let path = self.run_path(level, run_index)?;
                let pager = FilePager::create(&path, self.config.page_size)?;
                Ok(RunWriter::disk(
                    Box::new(pager),
                    path,
                    Arc::clone(self.disk_codec()?),
                    level,
                    run_index,
                ))
            }
        }
    }

    /// Open the existing run `(level, run_index)` from disk.
    pub fn open_run(&self, level: u32, run_index: u64) -> Result<Run<K, V>> {
        let path = self.run_path(level, run_index)?;
        let run = DiskRun::open(
            path,
            self.config.page_size,
            Arc::clone(self.disk_codec()?),
            level,
            run_index,
        )?;
        Ok(Run::Disk(run))
    }

    /// Persist the factory configuration record (disk backend only).
    pub fn persist(&self) -> Result<()> {
        let dir = match &self.backend {
            LevelBackend::Disk { dir, .. } => dir,
            LevelBackend::Memory => {
                return Err(Error::InvalidOperation(
                    "memory factories have nothing to persist".to_string(),
                ))
            }
        };

        let record = ConfigRecord {
            ordering_name: self.ordering.name().map(String::from),
            codec_id: self.disk_codec()?.id().to_string(),
            codec_state: self.disk_codec()?.state(),
            path: dir.to_string_lossy().into_owned(),
            memory_size: self.config.memory_size as u64,
            runs_per_level: self.config.runs_per_level as u64,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(dir.join(CONFIG_FILE))?;
        file.write_all(&record.encode())?;
        file.sync_all()?;
        Ok(())
    }

    fn run_path(&self, level: u32, run_index: u64) -> Result<PathBuf> {
        match &self.backend {
            LevelBackend::Disk { dir, .. } => Ok(dir.join(format!("{}-{}.run", level, run_index))),
            LevelBackend::Memory => Err(Error::InvalidOperation(
                "memory factories have no run files".to_string(),
            )),
        }
    }

    fn disk_codec(&self) -> Result<&Arc<dyn KvCodec<K, V>>> {
        self.codec.as_ref().ok_or_else(|| {
            Error::InvalidOperation("memory factories carry no codec".to_string())
        })
    }
}

/// One past the highest run index already on disk, so a reopened factory
/// never reuses a name.
fn next_free_run_index(dir: &Path) -> Result<u64> {
    let mut max: Option<u64> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".run") else { continue };
        if let Some((_, index)) = stem.split_once('-') {
            if let Ok(index) = index.parse::<u64>() {
                max = Some(max.map_or(index, |m: u64| m.max(index)));
            }
        }
    }
    Ok(max.map_or(0, |m| m + 1))
}

/// The self-describing on-disk factory configuration.
struct ConfigRecord {
    ordering_name: Option<String>,
    codec_id: String,
    codec_state: Vec<u8>,
    path: String,
    memory_size: u64,
    runs_per_level: u64,
}

const ORDERING_NATURAL: u8 = 0;
const ORDERING_CUSTOM: u8 = 1;

impl ConfigRecord {
    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();

        match &self.ordering_name {
            None => payload.write_u8(ORDERING_NATURAL).unwrap(),
            Some(name) => {
                payload.write_u8(ORDERING_CUSTOM).unwrap();
                payload.write_u16::<BigEndian>(name.len() as u16).unwrap();
                payload.extend_from_slice(name.as_bytes());
            }
        }

        payload
            .write_u16::<BigEndian>(self.codec_id.len() as u16)
            .unwrap();
        payload.extend_from_slice(self.codec_id.as_bytes());

        payload
            .write_u32::<BigEndian>(self.codec_state.len() as u32)
            .unwrap();
        payload.extend_from_slice(&self.codec_state);

        payload
            .write_u16::<BigEndian>(self.path.len() as u16)
            .unwrap();
        payload.extend_from_slice(self.path.as_bytes());

        write_uvarint(&mut payload, self.memory_size);
        write_uvarint(&mut payload, self.runs_per_level);

        let mut buf = Vec::with_capacity(payload.len() + 14);
        buf.write_u32::<BigEndian>(RECORD_MAGIC).unwrap();
        buf.write_u16::<BigEndian>(RECORD_VERSION).unwrap();
        buf.write_u32::<BigEndian>(payload.len() as u32).unwrap();
        buf.extend_from_slice(&payload);
        buf.write_u32::<BigEndian>(CRC32.checksum(&payload)).unwrap();
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32::<BigEndian>().map_err(malformed)?;
        if magic != RECORD_MAGIC {
            return Err(Error::InvalidConfig(format!(
                "bad record magic {:#010x}",
                magic
            )));
        }
        let version = cursor.read_u16::<BigEndian>().map_err(malformed)?;
        if version != RECORD_VERSION {
            return Err(Error::InvalidConfig(format!(
                "unsupported record version {}",
                version
            )));
        }

        let payload_len = cursor.read_u32::<BigEndian>().map_err(malformed)? as usize;
        let payload_start = cursor.position() as usize;
        if bytes.len() < payload_start + payload_len + 4 {
            return Err(Error::InvalidConfig("record truncated".to_string()));
        }
        let payload = &bytes[payload_start..payload_start + payload_len];

        let mut crc_cursor = Cursor::new(&bytes[payload_start + payload_len..]);
        let stored = crc_cursor.read_u32::<BigEndian>().map_err(malformed)?;
        let actual = CRC32.checksum(payload);
        if stored != actual {
            return Err(Error::Corrupt(format!(
                "record checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, actual
            )));
        }

        let mut cursor = Cursor::new(payload);

        let ordering_name = match cursor.read_u8().map_err(malformed)? {
            ORDERING_NATURAL => None,
            ORDERING_CUSTOM => Some(read_string(&mut cursor, "ordering name")?),
            kind => {
                return Err(Error::InvalidConfig(format!(
                    "unknown ordering kind {}",
                    kind
                )))
            }
        };

        let codec_id = read_string(&mut cursor, "codec id")?;

        let state_len = cursor.read_u32::<BigEndian>().map_err(malformed)? as usize;
        let mut codec_state = vec![0u8; state_len];
        std::io::Read::read_exact(&mut cursor, &mut codec_state).map_err(malformed)?;

        let path = read_string(&mut cursor, "storage path")?;
        let memory_size = read_uvarint(&mut cursor)?;
        let runs_per_level = read_uvarint(&mut cursor)?;

        Ok(Self {
            ordering_name,
            codec_id,
            codec_state,
            path,
            memory_size,
            runs_per_level,
        })
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String> {
    let len = cursor.read_u16::<BigEndian>().map_err(malformed)? as usize;
    let mut buf = vec![0u8; len];
    std::io::Read::read_exact(cursor, &mut buf).map_err(malformed)?;
    String::from_utf8(buf)
        .map_err(|_| Error::InvalidConfig(format!("{} is not valid UTF-8", what)))
}

fn malformed(err: std::io::Error) -> Error {
    Error::InvalidConfig(format!("record truncated: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::run::codec::TripleCodec;
    use crate::tmpfs::TempDir;

    #[test]
    fn capacity_geometry_disk() {
        let registry = Registry::for_triples();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let factory: LevelFactory<[u64; 3], u64> = LevelFactory::disk(
            dir.path(),
            KeyOrdering::Natural,
            Arc::new(TripleCodec::plain()),
            EngineConfig::default().memory_size(100).runs_per_level(4),
            &registry,
        )
        .expect("disk factory");

        assert_eq!(factory.level_capacity(0), 100);
        assert_eq!(factory.level_capacity(1), 100);
        assert_eq!(factory.level_capacity(2), 400);
        assert_eq!(factory.level_capacity(3), 1600);
    }

    #[test]
    fn capacity_geometry_memory() {
        let factory: LevelFactory<u32, u32> = LevelFactory::memory(
            KeyOrdering::Natural,
            EngineConfig::all_memory().memory_size(10),
        );

        assert_eq!(factory.level_capacity(0), 10);
        assert_eq!(factory.level_capacity(1), 10);
        assert_eq!(factory.level_capacity(2), 100);
        assert_eq!(factory.level_capacity(3), 1000);
    }

    #[test]
    fn create_level_dispatches_on_number() {
        let factory: LevelFactory<u32, u32> =
            LevelFactory::memory(KeyOrdering::Natural, EngineConfig::all_memory());

        assert!(factory.create_level(0).is_memory());
        let deeper = factory.create_level(2);
        assert!(!deeper.is_memory());
        assert_eq!(deeper.level_number(), 2);
    }

    #[test]
    fn instance_paths_are_distinct() {
        let registry = Registry::for_triples();
        let dir = TempDir::new().expect("Failed to create temp dir");

        let make = || -> LevelFactory<[u64; 3], u64> {
            LevelFactory::disk(
                dir.path(),
                KeyOrdering::Natural,
                Arc::new(TripleCodec::plain()),
                EngineConfig::default(),
                &registry,
            )
            .expect("disk factory")
        };

        let a = make();
        let b = make();
        assert_ne!(a.storage_path(), b.storage_path());
    }

    #[test]
    fn record_roundtrip() {
        let record = ConfigRecord {
            ordering_name: Some("by-predicate".to_string()),
            codec_id: "triple".to_string(),
            codec_state: vec![1],
            path: "/var/db/lsm-tree/3".to_string(),
            memory_size: 2_000_000,
            runs_per_level: 64,
        };

        let decoded = ConfigRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded.ordering_name, record.ordering_name);
        assert_eq!(decoded.codec_id, record.codec_id);
        assert_eq!(decoded.codec_state, record.codec_state);
        assert_eq!(decoded.path, record.path);
        assert_eq!(decoded.memory_size, record.memory_size);
        assert_eq!(decoded.runs_per_level, record.runs_per_level);
    }

    #[test]
    fn record_rejects_corruption() {
        let record = ConfigRecord {
            ordering_name: None,
            codec_id: "bincode".to_string(),
            codec_state: Vec::new(),
            path: "/tmp/x".to_string(),
            memory_size: 512,
            runs_per_level: 4,
        };

        let mut bytes = record.encode();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xff;
        assert!(ConfigRecord::decode(&bytes).is_err());

        assert!(matches!(
            ConfigRecord::decode(&[0, 1, 2, 3]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn persist_and_reopen() {
        let registry = Registry::for_triples();
        let dir = TempDir::new().expect("Failed to create temp dir");

        let factory: LevelFactory<[u64; 3], u64> = LevelFactory::disk(
            dir.path(),
            KeyOrdering::Natural,
            Arc::new(TripleCodec::delta()),
            EngineConfig::default()
                .memory_size(128)
                .runs_per_level(8)
                .page_size(256),
            &registry,
        )
        .expect("disk factory");

        // Write one run before persisting.
        let run_index = factory.next_run_index();
        let mut writer = factory.begin_run(1, run_index).expect("begin run");
        let entries: Vec<Entry<[u64; 3], u64>> =
            (0..50).map(|i| Entry::occupied([1, 2, i], i)).collect();
        for entry in &entries {
            writer.push(entry.clone()).expect("push");
        }
        writer.finish().expect("finish");

        factory.persist().expect("persist");

        let reopened: LevelFactory<[u64; 3], u64> = LevelFactory::open(
            factory.storage_path().expect("path"),
            EngineConfig::default().page_size(256),
            &registry,
        )
        .expect("open");

        assert_eq!(reopened.config().memory_size, 128);
        assert_eq!(reopened.config().runs_per_level, 8);
        assert_eq!(reopened.storage_path(), factory.storage_path());
        assert_eq!(
            reopened
                .ordering()
                .compare(&[1, 2, 3], &[1, 2, 4]),
            std::cmp::Ordering::Less
        );

        // Runs written before persistence stay readable.
        let run = reopened.open_run(1, run_index).expect("open run");
        let read: Vec<_> = run
            .stream()
            .collect::<Result<Vec<_>>>()
            .expect("stream");
        assert_eq!(read, entries);

        // And the reopened factory never reuses an index.
        assert!(reopened.next_run_index() > run_index);
    }

    #[test]
    fn reopen_with_custom_ordering() {
        let mut registry = Registry::for_triples();
        registry.register_ordering(
            "by-object",
            Arc::new(|a: &[u64; 3], b: &[u64; 3]| a[2].cmp(&b[2])),
        );

        let dir = TempDir::new().expect("Failed to create temp dir");
        let ordering = registry.resolve_ordering("by-object").expect("ordering");
        let factory: LevelFactory<[u64; 3], u64> = LevelFactory::disk(
            dir.path(),
            ordering,
            Arc::new(TripleCodec::plain()),
            EngineConfig::default(),
            &registry,
        )
        .expect("disk factory");
        factory.persist().expect("persist");

        let reopened: LevelFactory<[u64; 3], u64> = LevelFactory::open(
            factory.storage_path().expect("path"),
            EngineConfig::default(),
            &registry,
        )
        .expect("open");

        assert_eq!(reopened.ordering().name(), Some("by-object"));
        assert_eq!(
            reopened.ordering().compare(&[9, 9, 1], &[0, 0, 2]),
            std::cmp::Ordering::Less
        );

        // A registry without the ordering must refuse to open.
        let bare = Registry::for_triples();
        assert!(matches!(
            LevelFactory::<[u64; 3], u64>::open(
                factory.storage_path().expect("path"),
                EngineConfig::default(),
                &bare,
            ),
            Err(Error::UnknownOrdering(_))
        ));
    }

    #[test]
    fn unknown_codec_refuses_to_open() {
        let registry = Registry::for_triples();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let factory: LevelFactory<[u64; 3], u64> = LevelFactory::disk(
            dir.path(),
            KeyOrdering::Natural,
            Arc::new(TripleCodec::plain()),
            EngineConfig::default(),
            &registry,
        )
        .expect("disk factory");
        factory.persist().expect("persist");

        let empty: Registry<[u64; 3], u64> = Registry::new();
        assert!(matches!(
            LevelFactory::<[u64; 3], u64>::open(
                factory.storage_path().expect("path"),
                EngineConfig::default(),
                &empty,
            ),
            Err(Error::UnknownCodec(_))
        ));
    }
}
