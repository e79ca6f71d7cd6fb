//! Fixed-size buffer pool: pins pages into frames, evicts through the LRU
//! replacer, and writes dirty frames back to the disk manager.

mod disk;
mod frame;
mod guard;
mod lru;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::types::{FrameId, PageId, Result, UmbraError, PAGE_SIZE};

pub use disk::DiskManager;
pub use frame::Frame;
pub use guard::PageGuard;
pub use lru::LruReplacer;

/// Configuration for [`BufferPool`].
#[derive(Clone, Debug)]
pub struct BufferPoolOptions {
    /// Number of frames the pool holds in memory.
    pub pool_size: usize,
}

impl Default for BufferPoolOptions {
    fn default() -> Self {
        Self { pool_size: 128 }
    }
}

/// Counters tracking pool behavior.
#[derive(Default, Clone, Debug)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A pinned page: the id plus a handle to the frame's buffer.
///
/// The buffer lock is the page latch; `read`/`write` take its shared and
/// exclusive sides. Holding a `PageRef` does not by itself keep the pin —
/// pairing fetch with unpin is [`PageGuard`]'s job.
pub struct PageRef {
    id: PageId,
    buf: Arc<RwLock<Box<[u8]>>>,
}

impl PageRef {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.buf.write()
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_frames: Vec<FrameId>,
    stats: PoolStats,
}

/// Thread-safe page cache over a [`DiskManager`].
///
/// Every successful `new_page`/`fetch_page` leaves the page pinned once;
/// callers own exactly one matching `unpin_page`. Unpinned frames are
/// eviction candidates in least-recently-unpinned order.
pub struct BufferPool {
    disk: DiskManager,
    replacer: LruReplacer,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn open(path: impl AsRef<Path>, options: BufferPoolOptions) -> Result<Self> {
        Ok(Self::with_disk(DiskManager::open(path)?, options))
    }

    pub fn with_disk(disk: DiskManager, options: BufferPoolOptions) -> Self {
        let pool_size = options.pool_size.max(1);
        let frames = (0..pool_size).map(|_| Frame::new(PAGE_SIZE)).collect();
        Self {
            disk,
            replacer: LruReplacer::new(pool_size),
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_frames: (0..pool_size).rev().collect(),
                stats: PoolStats::default(),
            }),
        }
    }

    /// Allocates a fresh zeroed page, pinned once.
    pub fn new_page(&self) -> Result<PageRef> {
        let mut inner = self.inner.lock();
        let frame_id = self.claim_frame(&mut inner)?;
        let id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(err) => {
                inner.free_frames.push(frame_id);
                return Err(err);
            }
        };
        let frame = &mut inner.frames[frame_id];
        frame.buf.write().fill(0);
        frame.id = Some(id);
        frame.dirty = false;
        frame.pin_count = 1;
        let buf = Arc::clone(&frame.buf);
        inner.page_table.insert(id, frame_id);
        Ok(PageRef { id, buf })
    }

    /// Pins `id`, reading it from disk on a cache miss.
    pub fn fetch_page(&self, id: PageId) -> Result<PageRef> {
        if !id.is_valid() {
            return Err(UmbraError::Invalid("fetch of invalid page id"));
        }
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&id) {
            inner.stats.hits += 1;
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let buf = Arc::clone(&frame.buf);
            self.replacer.pin(frame_id);
            return Ok(PageRef { id, buf });
        }
        inner.stats.misses += 1;
        let frame_id = self.claim_frame(&mut inner)?;
        let frame = &mut inner.frames[frame_id];
        let buf = Arc::clone(&frame.buf);
        if let Err(err) = self.disk.read_page(id, &mut buf.write()) {
            inner.free_frames.push(frame_id);
            return Err(err);
        }
        let frame = &mut inner.frames[frame_id];
        frame.id = Some(id);
        frame.dirty = false;
        frame.pin_count = 1;
        inner.page_table.insert(id, frame_id);
        Ok(PageRef { id, buf })
    }

    /// Drops one pin; `is_dirty` ORs into the frame's dirty flag. At zero
    /// pins the frame becomes an eviction candidate.
    pub fn unpin_page(&self, id: PageId, is_dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let frame_id = *inner
            .page_table
            .get(&id)
            .ok_or(UmbraError::Invalid("unpin of non-resident page"))?;
        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(UmbraError::Invalid("unpin of unpinned page"));
        }
        frame.pin_count -= 1;
        frame.dirty |= is_dirty;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Releases `id` entirely: its frame (if resident) is discarded without
    /// write-back and the disk page returns to the free list. The page must
    /// not be pinned.
    pub fn delete_page(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&id) {
            if inner.frames[frame_id].pin_count > 0 {
                return Err(UmbraError::Invalid("delete of pinned page"));
            }
            self.replacer.pin(frame_id);
            inner.page_table.remove(&id);
            inner.frames[frame_id].reset();
            inner.free_frames.push(frame_id);
        }
        self.disk.deallocate_page(id);
        debug!(page = %id, "pager.delete");
        Ok(())
    }

    /// Writes `id` through to disk if it is resident and dirty.
    pub fn flush_page(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&id) {
            let frame = &inner.frames[frame_id];
            if frame.dirty {
                self.disk.write_page(id, &frame.buf.read())?;
                inner.frames[frame_id].dirty = false;
            }
        }
        Ok(())
    }

    /// Writes every dirty frame through and fsyncs the backing file.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for frame_id in 0..inner.frames.len() {
            let frame = &inner.frames[frame_id];
            if let (Some(id), true) = (frame.id, frame.dirty) {
                self.disk.write_page(id, &frame.buf.read())?;
                inner.frames[frame_id].dirty = false;
            }
        }
        self.disk.sync()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats.clone()
    }

    /// Number of frames with a nonzero pin count.
    pub fn pinned_frames(&self) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|frame| frame.pin_count > 0)
            .count()
    }

    pub fn pool_size(&self) -> usize {
        self.inner.lock().frames.len()
    }

    fn claim_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_frames.pop() {
            return Ok(frame_id);
        }
        let Some(frame_id) = self.replacer.victim() else {
            return Err(UmbraError::PoolExhausted);
        };
        let frame = &inner.frames[frame_id];
        debug_assert_eq!(frame.pin_count, 0);
        if let Some(old_id) = frame.id {
            if frame.dirty {
                let data = frame.buf.read();
                if let Err(err) = self.disk.write_page(old_id, &data) {
                    drop(data);
                    self.replacer.unpin(frame_id);
                    return Err(err);
                }
            }
            inner.page_table.remove(&old_id);
            inner.stats.evictions += 1;
            debug!(page = %old_id, frame = frame_id, "pager.evict");
        }
        let frame = &mut inner.frames[frame_id];
        frame.id = None;
        frame.dirty = false;
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(pool_size: usize) -> (tempfile::NamedTempFile, BufferPool) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let pool = BufferPool::open(tmp.path(), BufferPoolOptions { pool_size }).unwrap();
        (tmp, pool)
    }

    #[test]
    fn new_page_starts_pinned_and_zeroed() {
        let (_tmp, pool) = small_pool(4);
        let page = pool.new_page().unwrap();
        assert!(page.read().iter().all(|&b| b == 0));
        assert_eq!(pool.pinned_frames(), 1);
        pool.unpin_page(page.id(), false).unwrap();
        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn contents_survive_eviction() {
        let (_tmp, pool) = small_pool(2);
        let first = pool.new_page().unwrap();
        let first_id = first.id();
        first.write()[0] = 0x5A;
        pool.unpin_page(first_id, true).unwrap();

        // Churn through enough pages to force the first one out.
        for _ in 0..4 {
            let page = pool.new_page().unwrap();
            pool.unpin_page(page.id(), false).unwrap();
        }
        assert!(pool.stats().evictions > 0);

        let again = pool.fetch_page(first_id).unwrap();
        assert_eq!(again.read()[0], 0x5A);
        pool.unpin_page(first_id, false).unwrap();
    }

    #[test]
    fn pinned_pages_are_never_victims() {
        let (_tmp, pool) = small_pool(2);
        let a = pool.new_page().unwrap();
        let b = pool.new_page().unwrap();
        assert!(matches!(pool.new_page(), Err(UmbraError::PoolExhausted)));
        pool.unpin_page(a.id(), false).unwrap();
        let c = pool.new_page().unwrap();
        pool.unpin_page(b.id(), false).unwrap();
        pool.unpin_page(c.id(), false).unwrap();
    }

    #[test]
    fn unpin_must_match_a_pin() {
        let (_tmp, pool) = small_pool(2);
        let page = pool.new_page().unwrap();
        pool.unpin_page(page.id(), false).unwrap();
        assert!(pool.unpin_page(page.id(), false).is_err());
    }

    #[test]
    fn delete_rejects_pinned_pages_and_recycles_ids() {
        let (_tmp, pool) = small_pool(2);
        let page = pool.new_page().unwrap();
        let id = page.id();
        assert!(pool.delete_page(id).is_err());
        pool.unpin_page(id, false).unwrap();
        pool.delete_page(id).unwrap();
        let next = pool.new_page().unwrap();
        assert_eq!(next.id(), id);
        pool.unpin_page(next.id(), false).unwrap();
    }

    #[test]
    fn repeated_fetch_counts_hits() {
        let (_tmp, pool) = small_pool(2);
        let page = pool.new_page().unwrap();
        let id = page.id();
        pool.unpin_page(id, false).unwrap();
        for _ in 0..3 {
            pool.fetch_page(id).unwrap();
            pool.unpin_page(id, false).unwrap();
        }
        assert_eq!(pool.stats().hits, 3);
    }
}
