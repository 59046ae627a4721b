use std::path::PathBuf;
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::run::codec::KvCodec;
use crate::run::{DiskRun, MemoryRun, Run, RunHeader, RunMeta};

/// Materializes one run from an already-sorted entry sequence.
///
/// Callers push entries in ascending key order (the sequence comes from a
/// sorted memory level or a merge, so order holds by construction) and then
/// `finish`. A writer that fails or is abandoned must be `abort`ed so a
/// partial run file never survives.
pub enum RunWriter<K, V> {
    Memory(MemoryRunWriter<K, V>),
    Disk(DiskRunWriter<K, V>),
}

impl<K, V> RunWriter<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    pub fn memory(level: u32, run_index: u64) -> Self {
        RunWriter::Memory(MemoryRunWriter {
            entries: Vec::new(),
            level,
            run_index,
        })
    }

    pub fn disk(
        pager: Box<dyn Pager>,
        path: PathBuf,
        codec: Arc<dyn KvCodec<K, V>>,
        level: u32,
        run_index: u64,
    ) -> Self {
        let page_size = pager.page_size();
        RunWriter::Disk(DiskRunWriter {
            pager,
            path,
            codec,
            page_size,
            page: Vec::with_capacity(page_size),
            page_records: 0,
            prev: None,
            next_page: 1,
            count: 0,
            level,
            run_index,
        })
    }

    pub fn push(&mut self, entry: Entry<K, V>) -> Result<()> {
        match self {
            RunWriter::Memory(w) => {
                w.entries.push(entry);
                Ok(())
            }
            RunWriter::Disk(w) => w.push(entry),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            RunWriter::Memory(w) => w.entries.len() as u64,
            RunWriter::Disk(w) => w.count,
        }
    }

    pub fn finish(self) -> Result<Run<K, V>> {
        match self {
            RunWriter::Memory(w) => Ok(Run::Memory(MemoryRun::new(
                w.entries,
                w.level,
                w.run_index,
            ))),
            RunWriter::Disk(w) => w.finish(),
        }
    }

    /// Drop the writer and remove any partial output.
    pub fn abort(self) {
        if let RunWriter::Disk(w) = self {
            w.abort();
        }
    }
}

pub struct MemoryRunWriter<K, V> {
    entries: Vec<Entry<K, V>>,
    level: u32,
    run_index: u64,
}

pub struct DiskRunWriter<K, V> {
    pager: Box<dyn Pager>,
    path: PathBuf,
    codec: Arc<dyn KvCodec<K, V>>,
    page_size: usize,
    page: Vec<u8>,
    page_records: u32,
    prev: Option<Entry<K, V>>,
    next_page: u64,
    count: u64,
    level: u32,
    run_index: u64,
}

// Each data page leads with a u32 record count.
const PAGE_PREFIX: usize = 4;

impl<K, V> DiskRunWriter<K, V>
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    fn push(&mut self, entry: Entry<K, V>) -> Result<()> {
        let mut record = Vec::new();
        self.codec
            .encode_entry(&entry, self.prev.as_ref(), &mut record)?;

        if PAGE_PREFIX + self.page.len() + record.len() > self.page_size && self.page_records > 0 {
            self.seal_page()?;
            // Delta state resets with the page; re-encode against no base.
            record.clear();
            self.codec.encode_entry(&entry, None, &mut record)?;
        }

        if PAGE_PREFIX + record.len() > self.page_size {
            return Err(Error::EntryTooLarge {
                size: record.len(),
                max: self.page_size - PAGE_PREFIX,
            });
        }

        self.page.extend_from_slice(&record);
        self.page_records += 1;
        self.prev = Some(entry);
        self.count += 1;
        Ok(())
    }

    fn seal_page(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(PAGE_PREFIX + self.page.len());
        buf.write_u32::<BigEndian>(self.page_records).unwrap();
        buf.extend_from_slice(&self.page);

        self.pager.write_page(self.next_page, &buf)?;
        self.next_page += 1;
        self.page.clear();
        self.page_records = 0;
        self.prev = None;
        Ok(())
    }

    fn finish(mut self) -> Result<Run<K, V>> {
        match self.finish_inner() {
            Ok(run) => Ok(run),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn finish_inner(&mut self) -> Result<Run<K, V>> {
        if self.page_records > 0 {
            self.seal_page()?;
        }

        let header = RunHeader {
            page_size: self.page_size as u32,
            entry_count: self.count,
            data_pages: self.next_page - 1,
        };
        self.pager.write_page(0, &header.encode())?;
        self.pager.flush()?;

        let meta = RunMeta {
            level: self.level,
            run_index: self.run_index,
            entry_count: self.count,
            bytes: self.next_page * self.page_size as u64,
        };
        Ok(Run::Disk(DiskRun::new(
            self.path.clone(),
            self.page_size,
            Arc::clone(&self.codec),
            meta,
        )))
    }

    fn abort(self) {
        let path = self.path.clone();
        drop(self);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial run file");
        }
    }
}
