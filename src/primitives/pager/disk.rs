//! Page-granular allocation and transfer on top of [`FileIo`].

use std::path::Path;

use parking_lot::Mutex;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, Result, UmbraError, INVALID_PAGE_ID, PAGE_SIZE};

fn page_offset(id: PageId) -> u64 {
    u64::from(id.0) * PAGE_SIZE as u64
}

struct AllocState {
    next_page_id: u32,
    free_pages: Vec<PageId>,
}

/// Allocates, reads, and writes fixed-size pages in a backing file.
///
/// Deallocated pages go to an in-memory free list and are handed out again
/// before the file is extended. The free list is not persisted; a reopened
/// file simply resumes allocation past its current end.
pub struct DiskManager {
    io: Box<dyn FileIo>,
    alloc: Mutex<AllocState>,
}

impl DiskManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io = StdFileIo::open(path)?;
        Self::with_io(Box::new(io))
    }

    pub fn with_io(io: Box<dyn FileIo>) -> Result<Self> {
        let len = io.len()?;
        let next_page_id = len.div_ceil(PAGE_SIZE as u64) as u32;
        Ok(Self {
            io,
            alloc: Mutex::new(AllocState {
                next_page_id,
                free_pages: Vec::new(),
            }),
        })
    }

    pub fn allocate_page(&self) -> Result<PageId> {
        let mut alloc = self.alloc.lock();
        if let Some(id) = alloc.free_pages.pop() {
            return Ok(id);
        }
        if alloc.next_page_id == INVALID_PAGE_ID.0 {
            return Err(UmbraError::Invalid("page id space exhausted"));
        }
        let id = PageId(alloc.next_page_id);
        alloc.next_page_id += 1;
        Ok(id)
    }

    pub fn deallocate_page(&self, id: PageId) {
        self.alloc.lock().free_pages.push(id);
    }

    /// Reads one page. Offsets past the current end of file yield zeroes,
    /// so freshly allocated pages read back blank before their first flush.
    pub fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let off = page_offset(id);
        let len = self.io.len()?;
        if off >= len {
            buf.fill(0);
            return Ok(());
        }
        let avail = ((len - off) as usize).min(PAGE_SIZE);
        self.io.read_at(off, &mut buf[..avail])?;
        buf[avail..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.io.write_at(page_offset(id), buf)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }
}
