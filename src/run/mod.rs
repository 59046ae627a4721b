//! Immutable sorted runs.
//!
//! A run is the unit levels ≥ 1 are made of: a fully sorted, immutable
//! sequence of entries, either held in memory or paged to disk. Ordering is
//! guaranteed by construction (a run is only ever the flushed content of a
//! sorted memory level or the output of a merge), so readers never sort.
//!
//! # Disk layout
//!
//! ```text
//! +--------------------+
//! | Header (page 0)    |  magic, version, page size, entry count,
//! +--------------------+  data page count, CRC32
//! | Data page 1        |  count:u32, then `count` codec records
//! +--------------------+
//! | Data page 2        |
//! +--------------------+
//! | ...                |
//! +--------------------+
//! ```
//!
//! Pages are independently decodable (codec delta state resets per page),
//! so iteration is restartable: every call to [`Run::stream`] reopens the
//! file and starts from the first entry.

pub mod codec;
pub mod writer;

pub use codec::{BincodeCodec, KvCodec, TripleCodec};
pub use writer::RunWriter;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::pager::{FilePager, Pager};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const RUN_MAGIC: u32 = 0x5354_5241; // "STRA"
const RUN_VERSION: u16 = 1;

/// A fallible stream of entries in ascending key order.
pub type EntryStream<K, V> = Box<dyn Iterator<Item = Result<Entry<K, V>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    pub level: u32,
    pub run_index: u64,
    pub entry_count: u64,
    /// File size in bytes; zero for memory-resident runs.
    pub bytes: u64,
}

pub enum Run<K, V> {
    Memory(MemoryRun<K, V>),
    Disk(DiskRun<K, V>),
}

impl<K, V> Run<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    pub fn meta(&self) -> &RunMeta {
        match self {
            Run::Memory(run) => &run.meta,
            Run::Disk(run) => &run.meta,
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.meta().entry_count
    }

    /// A fresh pass over the run's entries in ascending key order. Disk runs
    /// reopen their file, so streams from the same run are independent.
    pub fn stream(&self) -> EntryStream<K, V> {
        match self {
            Run::Memory(run) => Box::new(run.stream()),
            Run::Disk(run) => Box::new(run.stream()),
        }
    }

    /// Reclaim the run's storage. Memory runs just drop; disk runs remove
    /// their file.
    pub fn destroy(self) -> Result<()> {
        match self {
            Run::Memory(_) => Ok(()),
            Run::Disk(run) => {
                std::fs::remove_file(&run.path)?;
                Ok(())
            }
        }
    }
}

/// A run held entirely in process memory.
pub struct MemoryRun<K, V> {
    entries: Arc<Vec<Entry<K, V>>>,
    meta: RunMeta,
}

impl<K, V> MemoryRun<K, V> {
    pub(crate) fn new(entries: Vec<Entry<K, V>>, level: u32, run_index: u64) -> Self {
        let meta = RunMeta {
            level,
            run_index,
            entry_count: entries.len() as u64,
            bytes: 0,
        };
        Self {
            entries: Arc::new(entries),
            meta,
        }
    }

    fn stream(&self) -> MemoryRunIter<K, V> {
        MemoryRunIter {
            entries: Arc::clone(&self.entries),
            pos: 0,
        }
    }
}

struct MemoryRunIter<K, V> {
    entries: Arc<Vec<Entry<K, V>>>,
    pos: usize,
}

impl<K: Clone, V: Clone> Iterator for MemoryRunIter<K, V> {
    type Item = Result<Entry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(entry))
    }
}

/// A run paged to disk, read through the pager boundary.
pub struct DiskRun<K, V> {
    path: PathBuf,
    page_size: usize,
    codec: Arc<dyn KvCodec<K, V>>,
    meta: RunMeta,
}

impl<K, V> DiskRun<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    pub(crate) fn new(
        path: PathBuf,
        page_size: usize,
        codec: Arc<dyn KvCodec<K, V>>,
        meta: RunMeta,
    ) -> Self {
        Self {
            path,
            page_size,
            codec,
            meta,
        }
    }

    /// Open an existing run file, validating its header.
    pub fn open(
        path: impl AsRef<Path>,
        page_size: usize,
        codec: Arc<dyn KvCodec<K, V>>,
        level: u32,
        run_index: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut pager = FilePager::open(&path, page_size)?;
        let header = RunHeader::decode(&pager.read_page(0)?)?;

        if header.page_size as usize != page_size {
            return Err(Error::Corrupt(format!(
                "{} was written with page size {}, opened with {}",
                path.display(),
                header.page_size,
                page_size
            )));
        }

        let meta = RunMeta {
            level,
            run_index,
            entry_count: header.entry_count,
            bytes: pager.page_count() * page_size as u64,
        };
        Ok(Self::new(path, page_size, codec, meta))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stream(&self) -> DiskRunIter<K, V> {
        DiskRunIter {
            path: self.path.clone(),
            page_size: self.page_size,
            codec: Arc::clone(&self.codec),
            expected: self.meta.entry_count,
            pager: None,
            data_pages: 0,
            next_page: 1,
            buffer: Vec::new().into_iter(),
            emitted: 0,
            done: false,
        }
    }
}

struct DiskRunIter<K, V> {
    path: PathBuf,
    page_size: usize,
    codec: Arc<dyn KvCodec<K, V>>,
    expected: u64,
    pager: Option<FilePager>,
    data_pages: u64,
    next_page: u64,
    buffer: std::vec::IntoIter<Entry<K, V>>,
    emitted: u64,
    done: bool,
}

impl<K, V> DiskRunIter<K, V> {
    fn open(&mut self) -> Result<()> {
        let mut pager = FilePager::open(&self.path, self.page_size)?;
        let header = RunHeader::decode(&pager.read_page(0)?)?;
        self.data_pages = header.data_pages;
        self.pager = Some(pager);
        Ok(())
    }

    fn fill_buffer(&mut self) -> Result<bool> {
        if self.next_page > self.data_pages {
            return Ok(false);
        }

        let pager = self
            .pager
            .as_mut()
            .expect("pager is opened before the first page read");
        let page = pager.read_page(self.next_page)?;
        self.next_page += 1;

        let mut cursor = Cursor::new(page.as_slice());
        let count = cursor.read_u32::<BigEndian>().map_err(|e| {
            Error::Corrupt(format!("unreadable record count in data page: {}", e))
        })?;

        let mut entries: Vec<Entry<K, V>> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = self.codec.decode_entry(&mut cursor, entries.last())?;
            entries.push(entry);
        }
        self.buffer = entries.into_iter();
        Ok(true)
    }
}

impl<K, V> Iterator for DiskRunIter<K, V> {
    type Item = Result<Entry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.pager.is_none() {
            if let Err(e) = self.open() {
                self.done = true;
                return Some(Err(e));
            }
        }

        loop {
            if let Some(entry) = self.buffer.next() {
                self.emitted += 1;
                return Some(Ok(entry));
            }

            match self.fill_buffer() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    if self.emitted != self.expected {
                        return Some(Err(Error::Corrupt(format!(
                            "run {} holds {} entries, header promised {}",
                            self.path.display(),
                            self.emitted,
                            self.expected
                        ))));
                    }
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

pub(crate) struct RunHeader {
    pub page_size: u32,
    pub entry_count: u64,
    pub data_pages: u64,
}

impl RunHeader {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(RUN_MAGIC).unwrap();
        buf.write_u16::<BigEndian>(RUN_VERSION).unwrap();
        buf.write_u32::<BigEndian>(self.page_size).unwrap();
        buf.write_u64::<BigEndian>(self.entry_count).unwrap();
        buf.write_u64::<BigEndian>(self.data_pages).unwrap();

        let checksum = CRC32.checksum(&buf);
        buf.write_u32::<BigEndian>(checksum).unwrap();
        buf
    }

    pub(crate) fn decode(page: &[u8]) -> Result<Self> {
        const BODY: usize = 4 + 2 + 4 + 8 + 8;
        if page.len() < BODY + 4 {
            return Err(Error::Corrupt("run header page too short".to_string()));
        }

        let mut cursor = Cursor::new(page);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != RUN_MAGIC {
            return Err(Error::Corrupt(format!(
                "bad run magic {:#010x}",
                magic
            )));
        }

        let version = cursor.read_u16::<BigEndian>()?;
        if version != RUN_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported run version {}",
                version
            )));
        }

        let page_size = cursor.read_u32::<BigEndian>()?;
        let entry_count = cursor.read_u64::<BigEndian>()?;
        let data_pages = cursor.read_u64::<BigEndian>()?;

        let stored = cursor.read_u32::<BigEndian>()?;
        let actual = CRC32.checksum(&page[..BODY]);
        if stored != actual {
            return Err(Error::Corrupt(format!(
                "run header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, actual
            )));
        }

        Ok(Self {
            page_size,
            entry_count,
            data_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    #[test]
    fn header_roundtrip() {
        let header = RunHeader {
            page_size: 4096,
            entry_count: 1234,
            data_pages: 9,
        };
        let mut page = header.encode();
        page.resize(4096, 0);

        let decoded = RunHeader::decode(&page).expect("decode");
        assert_eq!(decoded.page_size, 4096);
        assert_eq!(decoded.entry_count, 1234);
        assert_eq!(decoded.data_pages, 9);
    }

    #[test]
    fn header_rejects_corruption() {
        let header = RunHeader {
            page_size: 4096,
            entry_count: 1,
            data_pages: 1,
        };
        let mut page = header.encode();
        page[8] ^= 0xff;
        assert!(matches!(RunHeader::decode(&page), Err(Error::Corrupt(_))));

        assert!(RunHeader::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn memory_run_streams_are_independent() {
        let entries = vec![Entry::occupied(1u32, "a"), Entry::occupied(2u32, "b")];
        let run: Run<u32, &str> = Run::Memory(MemoryRun::new(entries, 1, 0));

        let first: Vec<_> = run.stream().map(|e| e.expect("entry")).collect();
        let second: Vec<_> = run.stream().map(|e| e.expect("entry")).collect();
        assert_eq!(first, second);
        assert_eq!(run.entry_count(), 2);
        assert_eq!(run.meta().bytes, 0);
    }
}
