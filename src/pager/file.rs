use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pager::Pager;

/// One file of fixed-size pages with a write-back buffer.
///
/// Writes accumulate in memory and hit the file only on `flush`, which also
/// syncs. Reads check the buffer first, so a reader through the same pager
/// sees its own unflushed writes.
pub struct FilePager {
    file: File,
    path: PathBuf,
    page_size: usize,
    pages: u64,
    dirty: BTreeMap<u64, Vec<u8>>,
}

impl FilePager {
    /// Create a fresh page file, truncating anything already at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            file,
            path,
            page_size,
            pages: 0,
            dirty: BTreeMap::new(),
        })
    }

    /// Open an existing page file read/write.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(Error::Corrupt(format!(
                "{} has length {} which is not a multiple of the page size {}",
                path.display(),
                len,
                page_size
            )));
        }

        Ok(Self {
            file,
            path,
            page_size,
            pages: len / page_size as u64,
            dirty: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Pager for FilePager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages
    }

    fn read_page(&mut self, index: u64) -> Result<Vec<u8>> {
        if let Some(buffered) = self.dirty.get(&index) {
            return Ok(buffered.clone());
        }

        if index >= self.pages {
            return Err(Error::Corrupt(format!(
                "page {} out of range ({} pages in {})",
                index,
                self.pages,
                self.path.display()
            )));
        }

        let mut buf = vec![0u8; self.page_size];
        self.file
            .seek(SeekFrom::Start(index * self.page_size as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_page(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(Error::EntryTooLarge {
                size: data.len(),
                max: self.page_size,
            });
        }

        let mut page = vec![0u8; self.page_size];
        page[..data.len()].copy_from_slice(data);
        self.dirty.insert(index, page);
        self.pages = self.pages.max(index + 1);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for (index, page) in &self.dirty {
            self.file
                .seek(SeekFrom::Start(index * self.page_size as u64))?;
            self.file.write_all(page)?;
        }
        self.dirty.clear();
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, first: u64) -> Result<()> {
        self.dirty.retain(|&index, _| index < first);
        self.file.set_len(first * self.page_size as u64)?;
        self.pages = self.pages.min(first);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("pages");

        let mut pager = FilePager::create(&path, 64).expect("create");
        pager.write_page(0, b"alpha").expect("write");
        pager.write_page(2, b"gamma").expect("write");

        // Buffered writes visible before flush; the gap page reads as zeroes.
        assert_eq!(pager.page_count(), 3);
        assert_eq!(&pager.read_page(0).expect("read")[..5], b"alpha");

        pager.flush().expect("flush");

        let mut reopened = FilePager::open(&path, 64).expect("open");
        assert_eq!(reopened.page_count(), 3);
        assert_eq!(&reopened.read_page(2).expect("read")[..5], b"gamma");
        assert!(reopened.read_page(1).expect("read").iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_read_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut pager = FilePager::create(dir.path().join("pages"), 64).expect("create");
        assert!(matches!(pager.read_page(0), Err(Error::Corrupt(_))));
    }

    #[test]
    fn oversized_page_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut pager = FilePager::create(dir.path().join("pages"), 8).expect("create");
        let result = pager.write_page(0, &[0u8; 9]);
        assert!(matches!(result, Err(Error::EntryTooLarge { .. })));
    }

    #[test]
    fn truncate_releases_tail() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("pages");
        let mut pager = FilePager::create(&path, 32).expect("create");
        for i in 0..4 {
            pager.write_page(i, &[i as u8 + 1; 32]).expect("write");
        }
        pager.flush().expect("flush");

        pager.truncate(2).expect("truncate");
        assert_eq!(pager.page_count(), 2);
        assert!(pager.read_page(2).is_err());
        assert_eq!(pager.read_page(1).expect("read")[0], 2);
    }

    #[test]
    fn misaligned_file_rejected() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("pages");
        std::fs::write(&path, [0u8; 33]).expect("write file");
        assert!(matches!(FilePager::open(&path, 32), Err(Error::Corrupt(_))));
    }
}
