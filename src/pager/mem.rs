use crate::error::{Error, Result};
use crate::pager::Pager;

/// Page store held entirely in process memory. Used by tests and anywhere a
/// run needs paging semantics without touching disk.
pub struct MemPager {
    pages: Vec<Vec<u8>>,
    page_size: usize,
}

impl MemPager {
    pub fn new(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_size,
        }
    }
}

impl Pager for MemPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.len() as u64
    }

    fn read_page(&mut self, index: u64) -> Result<Vec<u8>> {
        self.pages
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::Corrupt(format!("page {} out of range", index)))
    }

    fn write_page(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(Error::EntryTooLarge {
                size: data.len(),
                max: self.page_size,
            });
        }

        let index = index as usize;
        if index >= self.pages.len() {
            self.pages.resize(index + 1, vec![0u8; self.page_size]);
        }

        let mut page = vec![0u8; self.page_size];
        page[..data.len()].copy_from_slice(data);
        self.pages[index] = page;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, first: u64) -> Result<()> {
        self.pages.truncate(first as usize);
        Ok(())
    }
}
